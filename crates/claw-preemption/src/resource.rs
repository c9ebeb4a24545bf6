//! Resource vectors and quantity parsing.
//!
//! A [`ResourceVector`] maps resource names to non-negative integer
//! quantities in the smallest addressable unit (bytes for memory, millicores
//! for `vcore`). Missing components are treated as zero everywhere.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{PreemptionError, Result};

/// Resource name for memory, measured in bytes.
pub const MEMORY: &str = "memory";

/// Resource name for CPU, measured in millicores.
pub const VCORE: &str = "vcore";

/// Componentwise resource quantities.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceVector(BTreeMap<String, u64>);

impl ResourceVector {
    /// Creates an empty vector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a component.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, quantity: u64) -> Self {
        self.0.insert(name.into(), quantity);
        self
    }

    /// Sets the memory component in bytes.
    #[must_use]
    pub fn with_memory(self, bytes: u64) -> Self {
        self.with(MEMORY, bytes)
    }

    /// Sets the vcore component in millicores.
    #[must_use]
    pub fn with_vcore(self, millicores: u64) -> Self {
        self.with(VCORE, millicores)
    }

    /// Parses a map of resource name to quantity string, as found in
    /// configuration documents.
    ///
    /// # Errors
    ///
    /// Returns [`PreemptionError::InvalidQuantity`] for the first malformed
    /// quantity, checked in name order.
    pub fn from_quantities(quantities: &HashMap<String, String>) -> Result<Self> {
        let mut names: Vec<&String> = quantities.keys().collect();
        names.sort();
        let mut vector = Self::new();
        for name in names {
            if name.trim().is_empty() {
                return Err(PreemptionError::InvalidResource {
                    reason: "resource name cannot be empty".into(),
                });
            }
            let quantity = parse_quantity(name, &quantities[name])?;
            vector.0.insert(name.clone(), quantity);
        }
        Ok(vector)
    }

    /// Returns the quantity of a component, zero when missing.
    #[must_use]
    pub fn get(&self, name: &str) -> u64 {
        self.0.get(name).copied().unwrap_or(0)
    }

    /// Iterates over the components in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(name, quantity)| (name.as_str(), *quantity))
    }

    /// Returns the component names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Returns true if no component is set.
    ///
    /// For guarantees this means "no guarantee", which is different from a
    /// guarantee of zero.
    #[must_use]
    pub fn is_unset(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns true if every component is zero.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.values().all(|v| *v == 0)
    }

    /// Returns the componentwise sum.
    #[must_use]
    pub fn add(&self, other: &Self) -> Self {
        let mut result = self.clone();
        for (name, quantity) in &other.0 {
            let entry = result.0.entry(name.clone()).or_insert(0);
            *entry = entry.saturating_add(*quantity);
        }
        result
    }

    /// Returns the componentwise difference, saturating at zero.
    #[must_use]
    pub fn saturating_sub(&self, other: &Self) -> Self {
        let mut result = self.clone();
        for (name, quantity) in &other.0 {
            if let Some(entry) = result.0.get_mut(name) {
                *entry = entry.saturating_sub(*quantity);
            }
        }
        result
    }

    /// Caps each component of `self` at the matching component of `other`.
    #[must_use]
    pub fn capped_by(&self, other: &Self) -> Self {
        Self(
            self.0
                .iter()
                .map(|(name, quantity)| (name.clone(), (*quantity).min(other.get(name))))
                .collect(),
        )
    }

    /// Returns true if every component of `self` is at most the matching
    /// component of `other`.
    #[must_use]
    pub fn fits_within(&self, other: &Self) -> bool {
        self.0.iter().all(|(name, quantity)| *quantity <= other.get(name))
    }

    /// Returns true if at least one component of `self` is larger than the
    /// matching component of `other`.
    #[must_use]
    pub fn exceeds_any(&self, other: &Self) -> bool {
        !self.fits_within(other)
    }

    /// Returns true if `other` is set and every component of `other` is
    /// strictly larger than the matching component of `self`.
    #[must_use]
    pub fn strictly_below(&self, other: &Self) -> bool {
        !other.is_unset() && other.0.iter().all(|(name, limit)| self.get(name) < *limit)
    }

    /// Returns the positive part of `self - other` for each component.
    #[must_use]
    pub fn excess_over(&self, other: &Self) -> Self {
        let mut result = Self::new();
        for (name, quantity) in &self.0 {
            let excess = quantity.saturating_sub(other.get(name));
            if excess > 0 {
                result.0.insert(name.clone(), excess);
            }
        }
        result
    }

    /// Sums the given components, widening to avoid overflow.
    #[must_use]
    pub fn total_of<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> u128 {
        names.into_iter().map(|name| u128::from(self.get(name))).sum()
    }

    /// Returns true if both vectors hold a non-zero amount of some resource.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.0
            .iter()
            .any(|(name, quantity)| *quantity > 0 && other.get(name) > 0)
    }
}

impl fmt::Display for ResourceVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, (name, quantity)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}={quantity}")?;
        }
        write!(f, "]")
    }
}

fn is_cpu_resource(resource: &str) -> bool {
    matches!(resource, VCORE | "cpu")
}

/// Parses a quantity string for the given resource.
///
/// Accepts plain integers, decimal SI suffixes (`k M G T P E`) and binary
/// suffixes (`Ki Mi Gi Ti Pi Ei`). CPU resources are expressed in
/// millicores: `"2"` is 2000 and `"500m"` is 500.
///
/// # Errors
///
/// Returns [`PreemptionError::InvalidQuantity`] if the string is empty,
/// negative, fractional, carries an unknown suffix, or overflows.
pub fn parse_quantity(resource: &str, value: &str) -> Result<u64> {
    let invalid = |reason: String| PreemptionError::InvalidQuantity {
        resource: resource.to_string(),
        value: value.to_string(),
        reason,
    };

    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(invalid("quantity is empty".into()));
    }
    if trimmed.starts_with('-') {
        return Err(invalid("quantity cannot be negative".into()));
    }

    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, suffix) = trimmed.split_at(split);
    if digits.is_empty() {
        return Err(invalid("quantity must start with a number".into()));
    }
    let number: u64 = digits.parse().map_err(|e| invalid(format!("{e}")))?;

    let cpu = is_cpu_resource(resource);
    let base: u64 = if cpu { 1000 } else { 1 };
    let multiplier: u64 = match suffix {
        "" => base,
        "m" if cpu => 1,
        "k" => 1_000 * base,
        "M" => 1_000_000 * base,
        "G" => 1_000_000_000 * base,
        "T" => 1_000_000_000_000 * base,
        "P" => 1_000_000_000_000_000 * base,
        "E" if !cpu => 1_000_000_000_000_000_000,
        "Ki" => (1 << 10) * base,
        "Mi" => (1 << 20) * base,
        "Gi" => (1 << 30) * base,
        "Ti" => (1 << 40) * base,
        "Pi" => (1 << 50) * base,
        "Ei" if !cpu => 1 << 60,
        other => return Err(invalid(format!("unknown suffix {other:?}"))),
    };

    number
        .checked_mul(multiplier)
        .ok_or_else(|| invalid("quantity overflows".into()))
}
