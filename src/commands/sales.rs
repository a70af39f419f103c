use chrono::{DateTime, NaiveDate};
use rusqlite::params;
use tracing::info;

use super::discounts::load_discount;
use crate::auth::{require_admin, resolve_caller, Identity};
use crate::db::now;
use crate::error::{AppError, ValidationError};
use crate::models::{NewSale, Sale, SaleFilter};
use crate::validation::{clean_note, parse_date, round_money};
use crate::AppState;

const SALE_SELECT: &str = "SELECT s.id, s.discount_id, d.plate, s.fuel_type, s.payment_method, \
     s.liters, s.price_per_liter, s.gross_total, s.discount_rate, s.net_total, \
     s.staff_id, u.name, s.note, s.created_at \
     FROM sales s \
     LEFT JOIN discounts d ON d.id = s.discount_id \
     LEFT JOIN users u ON u.user_id = s.staff_id";

fn map_sale(row: &rusqlite::Row<'_>) -> rusqlite::Result<Sale> {
    Ok(Sale {
        id: row.get(0)?,
        discount_id: row.get(1)?,
        plate: row.get(2)?,
        fuel_type: row.get(3)?,
        payment_method: row.get(4)?,
        liters: row.get(5)?,
        price_per_liter: row.get(6)?,
        gross_total: row.get(7)?,
        discount_rate: row.get(8)?,
        net_total: row.get(9)?,
        staff_id: row.get(10)?,
        staff_name: row.get(11)?,
        note: row.get(12)?,
        created_at: row.get(13)?,
    })
}

fn positive(field: &str, value: f64) -> Result<f64, ValidationError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ValidationError::InvalidSale(format!(
            "{field} must be greater than 0"
        )));
    }
    Ok(value)
}

/// Price after applying a percentage discount.
pub fn discounted_total(gross: f64, rate: f64) -> f64 {
    round_money(gross * (1.0 - rate / 100.0))
}

/// Record a fuel sale against an active discount. The rate in force for the
/// chosen payment method is copied onto the sale so later rate edits do not
/// rewrite history.
pub fn record_sale(
    state: &AppState,
    identity: Option<&Identity>,
    sale: NewSale,
) -> Result<Sale, AppError> {
    let liters = positive("liters", sale.liters)?;
    let price_per_liter = positive("price_per_liter", sale.price_per_liter)?;
    let note = clean_note(sale.note.as_deref());

    let conn = state.db.lock();
    let caller = resolve_caller(&conn, identity)?;

    let discount = load_discount(&conn, sale.discount_id)?;
    if !discount.active {
        let reason = format!("discount for {} is not active", discount.plate);
        return Err(ValidationError::InvalidSale(reason).into());
    }

    let rate = discount.rate_for(sale.payment_method);
    let gross_total = round_money(liters * price_per_liter);
    let net_total = discounted_total(gross_total, rate);

    conn.execute(
        "INSERT INTO sales (discount_id, fuel_type, payment_method, liters, price_per_liter,
                            gross_total, discount_rate, net_total, staff_id, note, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            sale.discount_id,
            sale.fuel_type,
            sale.payment_method,
            liters,
            price_per_liter,
            gross_total,
            rate,
            net_total,
            caller.user_id,
            note,
            now()
        ],
    )?;
    let id = conn.last_insert_rowid();

    info!(
        sale_id = id,
        discount_id = sale.discount_id,
        method = %sale.payment_method,
        gross_total,
        net_total,
        staff = %caller.user_id,
        "discounted sale recorded"
    );

    let recorded = conn.query_row(&format!("{SALE_SELECT} WHERE s.id = ?1"), [id], map_sale)?;
    Ok(recorded)
}

fn contains_ci(haystack: Option<&str>, needle: &str) -> bool {
    haystack
        .map(|h| h.to_lowercase().contains(&needle.to_lowercase()))
        .unwrap_or(false)
}

fn sale_date(created_at: &str) -> Option<NaiveDate> {
    DateTime::parse_from_rfc3339(created_at)
        .ok()
        .map(|dt| dt.date_naive())
}

/// Sales history for admins, newest first, filtered by case-insensitive
/// substrings and inclusive date bounds.
pub fn list_sales(
    state: &AppState,
    identity: Option<&Identity>,
    filter: SaleFilter,
) -> Result<Vec<Sale>, AppError> {
    let date_from = filter.date_from.as_deref().map(parse_date).transpose()?;
    let date_to = filter.date_to.as_deref().map(parse_date).transpose()?;
    let plate = clean_note(filter.plate.as_deref()).map(|p| p.replace(char::is_whitespace, ""));
    let fuel_type = clean_note(filter.fuel_type.as_deref());
    let staff_name = clean_note(filter.staff_name.as_deref());

    let conn = state.db.lock();
    require_admin(&conn, identity)?;

    let mut stmt = conn.prepare(&format!("{SALE_SELECT} ORDER BY s.created_at DESC, s.id DESC"))?;
    let sales = stmt
        .query_map([], map_sale)?
        .collect::<Result<Vec<_>, _>>()?;

    let limit = state.config.workflow.history_limit as usize;
    let filtered = sales
        .into_iter()
        .filter(|s| plate.as_deref().map_or(true, |p| contains_ci(s.plate.as_deref(), p)))
        .filter(|s| fuel_type.as_deref().map_or(true, |f| contains_ci(Some(s.fuel_type.as_str()), f)))
        .filter(|s| staff_name.as_deref().map_or(true, |n| contains_ci(s.staff_name.as_deref(), n)))
        .filter(|s| match (sale_date(&s.created_at), date_from) {
            (Some(day), Some(from)) => day >= from,
            (None, Some(_)) => false,
            _ => true,
        })
        .filter(|s| match (sale_date(&s.created_at), date_to) {
            (Some(day), Some(to)) => day <= to,
            (None, Some(_)) => false,
            _ => true,
        })
        .take(limit)
        .collect();

    Ok(filtered)
}
