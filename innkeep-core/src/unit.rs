use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::reservation::PaymentMethod;

fn default_deposit_percentage() -> f64 {
    20.0
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentMethodSettings {
    pub enabled: bool,
    #[serde(default = "default_deposit_percentage")]
    pub deposit_percentage: f64,
}

impl Default for PaymentMethodSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            deposit_percentage: default_deposit_percentage(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CancellationPolicy {
    pub allow_guest_cancellation: bool,
    /// Guests may cancel up to this many hours before check-in.
    pub deadline_hours: i64,
}

impl Default for CancellationPolicy {
    fn default() -> Self {
        Self {
            allow_guest_cancellation: true,
            deadline_hours: 48,
        }
    }
}

/// Per-unit booking configuration. Maintained by property tooling; read-only here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnitSettings {
    pub unit_id: Uuid,
    pub property_id: Uuid,
    pub owner_id: Uuid,
    #[serde(default)]
    pub requires_owner_approval: bool,
    #[serde(default)]
    pub payment_methods: HashMap<PaymentMethod, PaymentMethodSettings>,
    #[serde(default)]
    pub cancellation: CancellationPolicy,
}

impl UnitSettings {
    /// Settings for an enabled method, or `None` when it is missing or switched off.
    pub fn enabled_method(&self, method: PaymentMethod) -> Option<&PaymentMethodSettings> {
        self.payment_methods.get(&method).filter(|m| m.enabled)
    }
}
