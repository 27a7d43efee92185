use crate::error::{FinancialModelError, Result};
use std::cmp::Ordering;
use std::collections::HashSet;

pub const VALUE_TOLERANCE: f64 = 0.01;

pub fn validate_fiscal_year_end_month(month: u32) -> Result<()> {
    if !(1..=12).contains(&month) {
        return Err(FinancialModelError::InvalidFiscalYearEndMonth(month));
    }
    Ok(())
}

/// `2025E`, `2025F` and `2025P` are projection years; `2023A` or `2023` are historical.
pub fn is_projection_year(label: &str) -> bool {
    matches!(
        label.trim().chars().last().map(|c| c.to_ascii_uppercase()),
        Some('E' | 'F' | 'P')
    )
}

pub fn year_number(label: &str) -> Option<i32> {
    let digits: String = label
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Chronological order: by year number, historical before projection, then by label.
pub fn compare_year_labels(a: &str, b: &str) -> Ordering {
    let key = |label: &str| (year_number(label).unwrap_or(i32::MAX), is_projection_year(label));
    key(a).cmp(&key(b)).then_with(|| a.cmp(b))
}

pub fn sort_years(years: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut sorted: Vec<String> = years
        .iter()
        .map(|y| y.trim().to_string())
        .filter(|y| !y.is_empty() && seen.insert(y.clone()))
        .collect();
    sorted.sort_by(|a, b| compare_year_labels(a, b));
    sorted
}

pub fn prior_year<'a>(years: &'a [String], year: &str) -> Option<&'a str> {
    let idx = years.iter().position(|y| y == year)?;
    idx.checked_sub(1).map(|i| years[i].as_str())
}

pub fn last_historical_year(years: &[String]) -> Option<&str> {
    years
        .iter()
        .rev()
        .find(|y| !is_projection_year(y))
        .map(String::as_str)
}

pub fn projection_years(years: &[String]) -> Vec<String> {
    years
        .iter()
        .filter(|y| is_projection_year(y))
        .cloned()
        .collect()
}

pub fn approx_eq(a: f64, b: f64, tolerance: f64) -> bool {
    (a - b).abs() <= tolerance
}

/// Lowercase, alphanumeric words joined by underscores.
pub fn slugify(label: &str) -> String {
    let mut slug = String::new();
    let mut pending_sep = false;
    for c in label.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !slug.is_empty() {
                slug.push('_');
            }
            pending_sep = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }
    if slug.is_empty() {
        slug.push_str("item");
    }
    slug
}

/// Returns `base`, or `base_2`, `base_3`, ... whichever is not yet taken.
pub fn unique_id(base: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(base) {
        return base.to_string();
    }
    let mut n = 2;
    loop {
        let candidate = format!("{}_{}", base, n);
        if !taken.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}
