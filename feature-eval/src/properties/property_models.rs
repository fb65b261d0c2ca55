use serde_json::{Map, Value};
use strum::{AsRefStr, EnumString};

/// A targeting condition: either a logical combinator (`$and`, `$or`, `$nor`, `$not`) or a
/// map of dot-separated attribute paths to expected values or operator objects.
pub type Condition = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, AsRefStr)]
pub enum OperatorType {
    #[strum(serialize = "$eq")]
    Eq,
    #[strum(serialize = "$ne")]
    Ne,
    #[strum(serialize = "$lt")]
    Lt,
    #[strum(serialize = "$lte")]
    Lte,
    #[strum(serialize = "$gt")]
    Gt,
    #[strum(serialize = "$gte")]
    Gte,
    #[strum(serialize = "$veq")]
    VersionEq,
    #[strum(serialize = "$vne")]
    VersionNe,
    #[strum(serialize = "$vgt")]
    VersionGt,
    #[strum(serialize = "$vgte")]
    VersionGte,
    #[strum(serialize = "$vlt")]
    VersionLt,
    #[strum(serialize = "$vlte")]
    VersionLte,
    #[strum(serialize = "$regex")]
    Regex,
    #[strum(serialize = "$in")]
    In,
    #[strum(serialize = "$nin")]
    NotIn,
    #[strum(serialize = "$elemMatch")]
    ElemMatch,
    #[strum(serialize = "$size")]
    Size,
    #[strum(serialize = "$all")]
    All,
    #[strum(serialize = "$exists")]
    Exists,
    #[strum(serialize = "$type")]
    Type,
    #[strum(serialize = "$not")]
    Not,
}

/// Runtime type tag reported by the `$type` operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum AttributeType {
    String,
    Number,
    Boolean,
    Array,
    Null,
    Object,
}

impl AttributeType {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::String(_) => AttributeType::String,
            Value::Number(_) => AttributeType::Number,
            Value::Bool(_) => AttributeType::Boolean,
            Value::Array(_) => AttributeType::Array,
            Value::Null => AttributeType::Null,
            Value::Object(_) => AttributeType::Object,
        }
    }
}
