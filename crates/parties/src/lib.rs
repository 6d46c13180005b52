//! `tallyerp-parties` — customer and supplier master data.

pub mod party;

pub use party::{ContactInfo, Party, PartyId, PartyKind};
