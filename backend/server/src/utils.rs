use std::{
    convert::Infallible,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
};

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{HeaderMap, request::Parts},
};
use chrono::{DateTime, NaiveTime, Utc};

use crate::{identity::ActorIdentity, state::AppState};

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn start_of_day_millis(now: DateTime<Utc>) -> i64 {
    now.date_naive().and_time(NaiveTime::MIN).and_utc().timestamp_millis()
}

/// Account id set by the auth gateway. Anything but a positive integer
/// counts as anonymous.
pub fn user_id_from_headers(headers: &HeaderMap, name: &str) -> Option<i64> {
    headers
        .get(name)?
        .to_str()
        .ok()?
        .trim()
        .parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
}

/// First hop of a forwarding header such as `x-forwarded-for`.
pub fn forwarded_address(headers: &HeaderMap, name: &str) -> Option<IpAddr> {
    headers
        .get(name)?
        .to_str()
        .ok()?
        .split(',')
        .next()?
        .trim()
        .parse()
        .ok()
}

/// What the transport and the auth gateway tell us about a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub user_id: Option<i64>,
    pub address: IpAddr,
}

impl Caller {
    pub fn identity(&self, fingerprint: Option<&str>) -> ActorIdentity {
        ActorIdentity::resolve(self.user_id, fingerprint, self.address)
    }

    pub fn anonymous(&self) -> ActorIdentity {
        ActorIdentity::resolve(None, None, self.address)
    }
}

impl FromRequestParts<Arc<AppState>> for Caller {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let config = &state.config;

        let user_id = user_id_from_headers(&parts.headers, &config.user_id_header);

        let forwarded = if config.trust_proxy {
            forwarded_address(&parts.headers, &config.forwarded_header)
        } else {
            None
        };

        let peer = ConnectInfo::<SocketAddr>::from_request_parts(parts, state)
            .await
            .ok()
            .map(|ConnectInfo(addr)| addr.ip());

        let address = forwarded
            .or(peer)
            .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));

        Ok(Self { user_id, address })
    }
}
