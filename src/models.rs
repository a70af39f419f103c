use std::fmt;
use std::str::FromStr;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
#[error("unknown {kind} '{value}'")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

/// Lower-case text enums stored as TEXT columns.
macro_rules! text_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(ParseEnumError {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Staff,
    Admin,
}

text_enum!(Role, "role", { Staff => "staff", Admin => "admin" });

/// Lifecycle shared by plate requests and shift handovers.
/// `Pending` is the only state that may be left.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
}

text_enum!(RequestStatus, "status", {
    Pending => "pending",
    Approved => "approved",
    Rejected => "rejected",
});

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestStatus::Pending)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FuelType {
    Diesel,
    Gasoline,
    Lpg,
}

text_enum!(FuelType, "fuel type", {
    Diesel => "diesel",
    Gasoline => "gasoline",
    Lpg => "lpg",
});

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Cash,
    Card,
}

text_enum!(PaymentMethod, "payment method", { Cash => "cash", Card => "card" });

// ===== USERS =====

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct UserProfile {
    pub user_id: String,
    pub name: String,
    pub email: Option<String>,
    pub role: Role,
    pub created_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NewUser {
    pub user_id: String,
    pub name: String,
    pub email: Option<String>,
    pub role: Role,
}

// ===== DISCOUNTS =====

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DiscountRecord {
    pub id: i64,
    pub plate: String,
    pub cash_rate: f64,
    pub card_rate: f64,
    pub note: Option<String>,
    pub active: bool,
    pub created_at: String,
}

impl DiscountRecord {
    pub fn rate_for(&self, method: PaymentMethod) -> f64 {
        match method {
            PaymentMethod::Cash => self.cash_rate,
            PaymentMethod::Card => self.card_rate,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NewDiscount {
    pub plate: String,
    pub cash_rate: f64,
    pub card_rate: f64,
    pub note: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateDiscount {
    pub cash_rate: f64,
    pub card_rate: f64,
    pub note: Option<String>,
    pub active: bool,
}

// ===== PLATE REQUESTS =====

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PlateRequest {
    pub id: i64,
    pub plate: String,
    pub note: Option<String>,
    pub status: RequestStatus,
    pub requested_by: String,
    pub requested_by_name: Option<String>,
    pub requested_by_email: Option<String>,
    pub created_at: String,
    pub processed_at: Option<String>,
    pub processed_by: Option<String>,
    pub processed_by_name: Option<String>,
    pub cash_rate: Option<f64>,
    pub card_rate: Option<f64>,
    pub rejection_note: Option<String>,
    pub approved_discount_id: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitPlateRequest {
    pub plate: String,
    pub note: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApprovePlateRequest {
    pub cash_rate: f64,
    pub card_rate: f64,
    /// Replaces the requester's note on the created discount when non-blank.
    pub note: Option<String>,
}

// ===== SHIFT HANDOVERS =====

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ShiftHandover {
    pub id: i64,
    pub incoming_user: String,
    pub incoming_user_name: Option<String>,
    pub outgoing_user: String,
    pub status: RequestStatus,
    pub created_at: String,
    pub approver_note: Option<String>,
    pub approved_at: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChecklistAnswerInput {
    pub item_id: i64,
    pub passed: bool,
    pub note: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChecklistAnswer {
    pub id: i64,
    pub handover_id: i64,
    pub item_id: i64,
    pub item_title: Option<String>,
    pub passed: bool,
    pub note: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartHandover {
    pub outgoing_user: String,
    pub answers: Vec<ChecklistAnswerInput>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HandoverWithAnswers {
    pub handover: ShiftHandover,
    pub answers: Vec<ChecklistAnswer>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChecklistItem {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub sort_order: i32,
    pub active: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NewChecklistItem {
    pub title: String,
    pub description: Option<String>,
    pub sort_order: i32,
}

// ===== SALES =====

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Sale {
    pub id: i64,
    pub discount_id: i64,
    pub plate: Option<String>,
    pub fuel_type: FuelType,
    pub payment_method: PaymentMethod,
    pub liters: f64,
    pub price_per_liter: f64,
    pub gross_total: f64,
    pub discount_rate: f64,
    pub net_total: f64,
    pub staff_id: String,
    pub staff_name: Option<String>,
    pub note: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NewSale {
    pub discount_id: i64,
    pub fuel_type: FuelType,
    pub payment_method: PaymentMethod,
    pub liters: f64,
    pub price_per_liter: f64,
    pub note: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct SaleFilter {
    pub plate: Option<String>,
    pub fuel_type: Option<String>,
    pub staff_name: Option<String>,
    /// Inclusive, `YYYY-MM-DD`.
    pub date_from: Option<String>,
    /// Inclusive of the whole day, `YYYY-MM-DD`.
    pub date_to: Option<String>,
}

// ===== CLEANING =====

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CleaningOperation {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub active: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NewCleaningOperation {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LogCleaning {
    pub operation_ids: Vec<i64>,
    /// RFC 3339; defaults to now.
    pub performed_at: Option<String>,
    pub note: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CleaningLog {
    pub id: i64,
    pub staff_id: String,
    pub staff_name: Option<String>,
    pub performed_at: String,
    pub note: Option<String>,
    pub created_at: String,
    /// Operation names, alphabetical.
    pub operations: Vec<String>,
}
