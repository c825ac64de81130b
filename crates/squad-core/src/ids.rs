//! Id generation helpers.
//!
//! Work items keep the short, human-addressable ids the original workspace
//! used (`sq-xxxxxxxx`); every other entity (signals, handoffs, delegations,
//! routing events, convoys) gets a time-ordered [`Uuid::now_v7`].

use uuid::Uuid;

/// Generates a fresh work-item id: the `sq-` prefix plus an 8-hex-digit
/// suffix taken from a v7 UUID, mirroring `WorkStateManager.generate_id`.
pub fn work_item_id() -> String {
    let uuid = Uuid::now_v7();
    format!("sq-{}", &uuid.simple().to_string()[..8])
}

/// Generates a fresh time-ordered id for any other entity.
pub fn entity_id() -> Uuid {
    Uuid::now_v7()
}
