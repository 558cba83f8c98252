use std::fmt;

use serde::{Deserialize, Serialize};

/// Subscription class that selects a quota policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Guest,
    Member,
    Premium,
}

impl Tier {
    /// All tiers, lowest allowance first.
    pub const ALL: [Tier; 3] = [Tier::Guest, Tier::Member, Tier::Premium];

    /// Resolve a role string. Unknown roles are treated as guests.
    pub fn from_role(role: &str) -> Self {
        match role.trim().to_ascii_lowercase().as_str() {
            "premium" => Tier::Premium,
            "member" => Tier::Member,
            _ => Tier::Guest,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Guest => "guest",
            Tier::Member => "member",
            Tier::Premium => "premium",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authenticated caller as vouched for by the session layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    /// Stable user identifier
    pub id: String,

    /// Role claim; free-form, resolved through [`Tier::from_role`]
    pub role: String,
}

impl AuthContext {
    pub fn new(id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: role.into(),
        }
    }
}

/// Who is asking, for quota purposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallerIdentity {
    Authenticated { id: String, tier: Tier },
    Anonymous { source_address: String },
}

impl CallerIdentity {
    pub fn tier(&self) -> Tier {
        match self {
            CallerIdentity::Authenticated { tier, .. } => *tier,
            CallerIdentity::Anonymous { .. } => Tier::Guest,
        }
    }

    /// The value the quota counter is keyed on.
    pub fn limiter_key(&self) -> &str {
        match self {
            CallerIdentity::Authenticated { id, .. } => id,
            CallerIdentity::Anonymous { source_address } => source_address,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, CallerIdentity::Authenticated { .. })
    }
}

/// Derive the caller identity for one request.
///
/// A session identity always wins over the network address: addresses can be
/// shared (NAT, proxies) while the user id is stable. An empty user id is not
/// an identity and falls back to the address.
pub fn classify(auth: Option<&AuthContext>, source_address: &str) -> CallerIdentity {
    match auth {
        Some(ctx) if !ctx.id.trim().is_empty() => CallerIdentity::Authenticated {
            id: ctx.id.clone(),
            tier: Tier::from_role(&ctx.role),
        },
        _ => CallerIdentity::Anonymous {
            source_address: source_address.to_string(),
        },
    }
}
