use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Beneficiary {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub destinations: Vec<DestinationAccount>,
    pub created_at: DateTime<Utc>,
}

impl Beneficiary {
    /// The requested destination, or the first active one when none is named.
    pub fn select_destination(&self, destination_id: Option<Uuid>) -> Option<&DestinationAccount> {
        match destination_id {
            Some(id) => self.destinations.iter().find(|d| d.id == id && d.is_active),
            None => self.destinations.iter().find(|d| d.is_active),
        }
    }
}

/// An on-chain address a beneficiary can receive at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationAccount {
    pub id: Uuid,
    pub beneficiary_id: Uuid,
    pub address: String,
    pub network: String,
    /// ISO 3166-1 alpha-2 of the receiving party.
    pub country: String,
    pub is_active: bool,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub total_sends: i64,
    pub total_asset_sent: BigDecimal,
    /// Cumulative face value, minor units.
    pub total_sent: i64,
    pub first_send_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl DestinationAccount {
    pub fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        self.cooldown_until.map_or(false, |until| now < until)
    }

    pub fn is_new(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        now - self.created_at < max_age
    }

    /// Folds a completed send into the running counters. Cooldown is assigned
    /// at most once: on a large send to a destination that is still new.
    pub fn record_send(
        &mut self,
        face_value: i64,
        asset_amount: &BigDecimal,
        now: DateTime<Utc>,
        cooldown: &CooldownPolicy,
    ) {
        let qualifies_for_cooldown = self.cooldown_until.is_none()
            && self.is_new(now, cooldown.new_destination_age)
            && face_value > cooldown.threshold;

        self.total_sends += 1;
        self.total_sent += face_value;
        self.total_asset_sent = &self.total_asset_sent + asset_amount;
        if self.first_send_at.is_none() {
            self.first_send_at = Some(now);
        }
        if qualifies_for_cooldown {
            self.cooldown_until = Some(now + cooldown.duration);
        }
    }
}

#[derive(Debug, Clone)]
pub struct CooldownPolicy {
    /// Face value (minor units) above which a send to a new destination
    /// starts the cooldown.
    pub threshold: i64,
    pub duration: Duration,
    pub new_destination_age: Duration,
}
