//! Payload schemas and operation validation.
//!
//! Each entity type declares the fields its create/update payload must carry.
//! Validation turns a raw [`SyncOperation`] into a typed [`Command`] or
//! explains why it cannot be applied.

use crate::{
    error::Result,
    ledger::{AdjustmentReason, StockAdjustment},
    Action, Command, EntityCommand, EntityType, Error, SyncOperation,
};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;

/// Accepted `payment_method` values on sales.
pub const PAYMENT_METHODS: &[&str] = &["cash", "card", "mobile_money", "bank_transfer", "credit"];

/// Accepted `category` values on expenses.
pub const EXPENSE_CATEGORIES: &[&str] = &[
    "rent",
    "utilities",
    "inventory",
    "salaries",
    "transport",
    "marketing",
    "maintenance",
    "other",
];

/// Accepted `reason` values on stock adjustments.
pub const ADJUSTMENT_REASONS: &[&str] = &AdjustmentReason::NAMES;

/// Field types supported in payload schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Int,
    Float,
    /// Non-negative number
    Money,
    Bool,
    Timestamp,
    /// One of a closed set of strings
    Choice(&'static [&'static str]),
    /// Arbitrary nested JSON
    Json,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::String => write!(f, "String"),
            FieldType::Int => write!(f, "Int"),
            FieldType::Float => write!(f, "Float"),
            FieldType::Money => write!(f, "Money"),
            FieldType::Bool => write!(f, "Bool"),
            FieldType::Timestamp => write!(f, "Timestamp"),
            FieldType::Choice(options) => write!(f, "one of [{}]", options.join(", ")),
            FieldType::Json => write!(f, "Json"),
        }
    }
}

/// Definition of a field in a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    pub name: String,
    pub field_type: FieldType,
    pub required: bool,
}

impl FieldDef {
    /// Create a new required field definition.
    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: true,
        }
    }

    /// Create a new optional field definition.
    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
        }
    }

    /// Validate a JSON value against this field definition.
    pub fn validate(&self, value: Option<&Value>) -> Result<()> {
        match value {
            None | Some(Value::Null) if self.required => {
                Err(Error::MissingRequiredField(self.name.clone()))
            }
            None | Some(Value::Null) => Ok(()),
            Some(v) => self.validate_type(v),
        }
    }

    fn validate_type(&self, value: &Value) -> Result<()> {
        let valid = match self.field_type {
            FieldType::String => value.is_string(),
            FieldType::Int => value.is_i64() || value.is_u64(),
            FieldType::Float => value.is_number(),
            FieldType::Money => value.as_f64().map(|n| n >= 0.0).unwrap_or(false),
            FieldType::Bool => value.is_boolean(),
            FieldType::Timestamp => value.is_u64(),
            FieldType::Choice(options) => {
                return match value.as_str() {
                    Some(s) if options.contains(&s) => Ok(()),
                    Some(s) => Err(Error::InvalidChoice {
                        field: self.name.clone(),
                        value: s.to_string(),
                    }),
                    None => Err(self.mismatch(value)),
                };
            }
            FieldType::Json => true,
        };

        if valid {
            Ok(())
        } else {
            Err(self.mismatch(value))
        }
    }

    fn mismatch(&self, value: &Value) -> Error {
        Error::TypeMismatch {
            field: self.name.clone(),
            expected: self.field_type.to_string(),
            got: json_type_name(value).to_string(),
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "Null",
        Value::Bool(_) => "Bool",
        Value::Number(n) if n.is_i64() || n.is_u64() => "Int",
        Value::Number(_) => "Float",
        Value::String(_) => "String",
        Value::Array(_) => "Array",
        Value::Object(_) => "Object",
    }
}

/// Fields of one entity type's payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadSchema {
    pub entity_type: EntityType,
    pub fields: Vec<FieldDef>,
}

impl PayloadSchema {
    pub fn new(entity_type: EntityType, fields: Vec<FieldDef>) -> Self {
        Self {
            entity_type,
            fields,
        }
    }

    /// Validate a payload object against this schema.
    pub fn validate_payload(&self, payload: &Map<String, Value>) -> Result<()> {
        for field in &self.fields {
            field.validate(payload.get(&field.name))?;
        }
        Ok(())
    }
}

/// Payload schemas for every entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    payloads: HashMap<EntityType, PayloadSchema>,
}

/// Fields that address an entity rather than describe it.
const ID_FIELD: &str = "id";
const BASE_VERSION_FIELD: &str = "base_version";

impl Schema {
    /// A schema with no payload definitions.
    pub fn empty() -> Self {
        Self {
            payloads: HashMap::new(),
        }
    }

    /// The schema the shop backend syncs.
    pub fn shop() -> Self {
        Self::empty()
            .with_payload(PayloadSchema::new(
                EntityType::Sale,
                vec![
                    FieldDef::required("total", FieldType::Money),
                    FieldDef::required("payment_method", FieldType::Choice(PAYMENT_METHODS)),
                    FieldDef::optional("items", FieldType::Json),
                    FieldDef::optional("customer_name", FieldType::String),
                    FieldDef::optional("note", FieldType::String),
                    FieldDef::optional("sold_at", FieldType::Timestamp),
                ],
            ))
            .with_payload(PayloadSchema::new(
                EntityType::Expense,
                vec![
                    FieldDef::required("amount", FieldType::Money),
                    FieldDef::required("category", FieldType::Choice(EXPENSE_CATEGORIES)),
                    FieldDef::optional("description", FieldType::String),
                    FieldDef::optional("incurred_at", FieldType::Timestamp),
                ],
            ))
            .with_payload(PayloadSchema::new(
                EntityType::Product,
                vec![
                    FieldDef::required("name", FieldType::String),
                    FieldDef::required("unit_price", FieldType::Money),
                    FieldDef::optional("cost_price", FieldType::Money),
                    FieldDef::optional("sku", FieldType::String),
                    FieldDef::optional("category", FieldType::String),
                    FieldDef::optional("unit", FieldType::String),
                    FieldDef::optional("low_stock_threshold", FieldType::Int),
                ],
            ))
            .with_payload(PayloadSchema::new(
                EntityType::StockAdjustment,
                vec![
                    FieldDef::required("product_id", FieldType::String),
                    FieldDef::required("delta", FieldType::Int),
                    FieldDef::required("reason", FieldType::Choice(ADJUSTMENT_REASONS)),
                    FieldDef::optional("allow_negative", FieldType::Bool),
                    FieldDef::optional("note", FieldType::String),
                ],
            ))
    }

    /// Builder-style method to add a payload schema.
    pub fn with_payload(mut self, payload: PayloadSchema) -> Self {
        self.payloads.insert(payload.entity_type, payload);
        self
    }

    pub fn get_payload(&self, entity_type: EntityType) -> Option<&PayloadSchema> {
        self.payloads.get(&entity_type)
    }

    /// Validate an operation and turn it into a command.
    pub fn validate(&self, op: &SyncOperation) -> Result<Command> {
        let payload = op
            .payload
            .as_object()
            .ok_or_else(|| Error::InvalidPayload("payload must be an object".into()))?;

        let Some(kind) = op.entity_type.entity_kind() else {
            return match op.action {
                Action::Create => self.validate_stock(op, payload).map(Command::Stock),
                action => Err(Error::UnsupportedAction {
                    entity_type: op.entity_type,
                    action,
                }),
            };
        };

        let id = required_id(payload, ID_FIELD)?;
        let base_version = match payload.get(BASE_VERSION_FIELD) {
            None | Some(Value::Null) => None,
            Some(v) => Some(v.as_u64().ok_or_else(|| Error::TypeMismatch {
                field: BASE_VERSION_FIELD.into(),
                expected: FieldType::Int.to_string(),
                got: json_type_name(v).to_string(),
            })?),
        };

        let (body, reason) = match op.action {
            Action::Void => {
                let reason_field = FieldDef::optional("reason", FieldType::String);
                reason_field.validate(payload.get("reason"))?;
                let reason = payload
                    .get("reason")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                (Value::Object(Map::new()), reason)
            }
            Action::Create | Action::Update => {
                if let Some(schema) = self.payloads.get(&op.entity_type) {
                    schema.validate_payload(payload)?;
                }
                let mut body = payload.clone();
                body.remove(ID_FIELD);
                body.remove(BASE_VERSION_FIELD);
                (Value::Object(body), None)
            }
        };

        Ok(Command::Entity(EntityCommand {
            kind,
            action: op.action,
            id,
            body,
            base_version,
            reason,
        }))
    }

    fn validate_stock(
        &self,
        op: &SyncOperation,
        payload: &Map<String, Value>,
    ) -> Result<StockAdjustment> {
        if let Some(schema) = self.payloads.get(&op.entity_type) {
            schema.validate_payload(payload)?;
        }

        let product_id = required_id(payload, "product_id")?;
        let delta = payload
            .get("delta")
            .and_then(Value::as_i64)
            .ok_or_else(|| Error::MissingRequiredField("delta".into()))?;
        if delta == 0 {
            return Err(Error::InvalidPayload("delta must be non-zero".into()));
        }
        let reason: AdjustmentReason = payload
            .get("reason")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| Error::InvalidPayload(e.to_string()))?
            .unwrap_or(AdjustmentReason::Correction);

        Ok(StockAdjustment {
            product_id,
            delta,
            reason,
            allow_negative: payload
                .get("allow_negative")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            note: payload
                .get("note")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::shop()
    }
}

fn required_id(payload: &Map<String, Value>, field: &str) -> Result<String> {
    FieldDef::required(field, FieldType::String).validate(payload.get(field))?;
    match payload.get(field).and_then(Value::as_str) {
        Some(id) if !id.trim().is_empty() => Ok(id.to_string()),
        _ => Err(Error::InvalidPayload(format!("{} must not be empty", field))),
    }
}
