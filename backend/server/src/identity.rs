//! # Actor Identity
//!
//! Every like edge belongs to exactly one identity, picked from the strongest
//! signal a request carries:
//!
//! 1. **User**: authenticated account id, survives network and device changes
//! 2. **Device**: client fingerprint of at least 16 bytes
//! 3. **Ip**: observed network address, always available
//!
//! Anonymous tiers never alias each other. A `Device` edge stores only the
//! fingerprint and an `Ip` edge stores only the address, so the same browser
//! liking once with and once without a fingerprint produces two edges.
use std::net::IpAddr;

use serde::Serialize;

pub const MIN_FINGERPRINT_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ActorIdentity {
    User(i64),
    Device(String),
    Ip(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityKind {
    UserId,
    DeviceFingerprint,
    IpAddress,
}

impl IdentityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            IdentityKind::UserId => "user_id",
            IdentityKind::DeviceFingerprint => "device_fingerprint",
            IdentityKind::IpAddress => "ip_address",
        }
    }
}

impl ActorIdentity {
    pub fn resolve(user_id: Option<i64>, fingerprint: Option<&str>, address: IpAddr) -> Self {
        if let Some(id) = user_id {
            return ActorIdentity::User(id);
        }

        match fingerprint.map(str::trim) {
            Some(fp) if fp.len() >= MIN_FINGERPRINT_LEN => {
                ActorIdentity::Device(fp.to_string())
            }
            _ => ActorIdentity::Ip(address.to_canonical().to_string()),
        }
    }

    pub fn kind(&self) -> IdentityKind {
        match self {
            ActorIdentity::User(_) => IdentityKind::UserId,
            ActorIdentity::Device(_) => IdentityKind::DeviceFingerprint,
            ActorIdentity::Ip(_) => IdentityKind::IpAddress,
        }
    }

    pub fn value(&self) -> String {
        match self {
            ActorIdentity::User(id) => id.to_string(),
            ActorIdentity::Device(fp) => fp.clone(),
            ActorIdentity::Ip(addr) => addr.clone(),
        }
    }

    /// Column values for `(user_id, device_fingerprint, ip_address)`.
    /// Exactly one is set.
    pub fn columns(&self) -> (Option<i64>, Option<&str>, Option<&str>) {
        match self {
            ActorIdentity::User(id) => (Some(*id), None, None),
            ActorIdentity::Device(fp) => (None, Some(fp.as_str()), None),
            ActorIdentity::Ip(addr) => (None, None, Some(addr.as_str())),
        }
    }
}
