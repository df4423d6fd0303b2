//! Caller identity.
//!
//! Identity only selects a quota tier and keys the counter. Nothing here is
//! persisted beyond the process.

use std::fmt;
use std::net::IpAddr;

use serde::Serialize;

/// User attributes supplied by the upstream authentication layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthenticatedUser {
    pub id: String,
    pub is_seller: bool,
}

/// Class of caller, used for tier selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallerClass {
    Public,
    Authenticated,
    Seller,
}

impl CallerClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallerClass::Public => "public",
            CallerClass::Authenticated => "authenticated",
            CallerClass::Seller => "seller",
        }
    }
}

/// Who is calling: origin IP plus optional authenticated user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub ip: IpAddr,
    pub user: Option<AuthenticatedUser>,
}

impl CallerIdentity {
    /// An unauthenticated caller known only by IP.
    pub fn anonymous(ip: IpAddr) -> Self {
        Self { ip, user: None }
    }

    /// An authenticated caller.
    pub fn authenticated(ip: IpAddr, user_id: impl Into<String>, is_seller: bool) -> Self {
        Self {
            ip,
            user: Some(AuthenticatedUser {
                id: user_id.into(),
                is_seller,
            }),
        }
    }

    pub fn class(&self) -> CallerClass {
        match &self.user {
            None => CallerClass::Public,
            Some(user) if user.is_seller => CallerClass::Seller,
            Some(_) => CallerClass::Authenticated,
        }
    }

    /// Counter key: the user id when authenticated, otherwise the IP.
    pub fn key(&self) -> String {
        match &self.user {
            Some(user) => format!("user:{}", user.id),
            None => format!("ip:{}", self.ip),
        }
    }
}

impl fmt::Display for CallerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}
