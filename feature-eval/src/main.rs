use anyhow::{anyhow, Context};
use envconfig::Envconfig;
use tracing::info;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use feature_eval::config::Config;
use feature_eval::flags::flag_matching::{ContextOptions, EvaluationContext};
use feature_eval::flags::flag_repository::FeatureRepository;

fn init_logging(debug: bool) {
    let log_layer = {
        let base_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_level(true)
            .with_writer(std::io::stderr);

        if debug {
            base_layer
                .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
                .with_ansi(true)
                .with_filter(EnvFilter::from_default_env())
                .boxed()
        } else {
            base_layer
                .json()
                .with_filter(EnvFilter::from_default_env())
                .boxed()
        }
    };

    tracing_subscriber::registry().with(log_layer).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::init_from_env().context("Invalid configuration")?;
    init_logging(*config.debug);

    let attributes = config.attributes().map_err(|e| anyhow!(e))?;
    let repository = FeatureRepository::new(
        config.features_endpoint.clone(),
        config.decryption_key.clone(),
        config.request_timeout(),
    )?;
    let features = repository.fetch_strict().await?;
    info!(feature_count = features.len(), "Loaded feature definitions");

    let mut context = EvaluationContext::new(ContextOptions {
        enabled: *config.enabled,
        attributes,
        url: config.url.clone(),
        features,
        qa_mode: *config.qa_mode,
        ..ContextOptions::default()
    });

    // Results go to stdout, one JSON object per line; logs go to stderr.
    let mut keys = config.feature_keys();
    if keys.is_empty() {
        keys = context.features().keys().cloned().collect();
        keys.sort();
    }
    for key in keys {
        let result = context.eval_feature(&key);
        let line = serde_json::json!({ "key": key, "result": result });
        println!("{}", serde_json::to_string(&line)?);
    }

    Ok(())
}
