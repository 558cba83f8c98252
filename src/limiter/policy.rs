use super::Tier;

/// One day, the window every default policy uses.
pub const DEFAULT_WINDOW_SECS: u64 = 24 * 60 * 60;

pub const DEFAULT_GUEST_ALLOWANCE: u32 = 2;
pub const DEFAULT_MEMBER_ALLOWANCE: u32 = 5;
pub const DEFAULT_PREMIUM_ALLOWANCE: u32 = 20;

/// Allowance and window for one tier.
///
/// Only [`QuotaPolicy::new`] builds one, so the allowance and window are
/// always non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaPolicy {
    tier: Tier,
    allowance: u32,
    window_secs: u64,
}

impl QuotaPolicy {
    /// Create a policy, rejecting a zero allowance or window.
    pub fn new(tier: Tier, allowance: u32, window_secs: u64) -> Result<Self, String> {
        if allowance == 0 {
            return Err(format!("{} allowance must be greater than 0", tier));
        }
        if window_secs == 0 {
            return Err(format!("{} window must be greater than 0", tier));
        }
        Ok(Self {
            tier,
            allowance,
            window_secs,
        })
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    /// Actions admitted per window.
    pub fn allowance(&self) -> u32 {
        self.allowance
    }

    pub fn window_secs(&self) -> u64 {
        self.window_secs
    }
}

/// Quota policy for every tier.
///
/// One field per tier keeps the lookup total: there is no tier without a
/// policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyTable {
    guest: QuotaPolicy,
    member: QuotaPolicy,
    premium: QuotaPolicy,
}

impl PolicyTable {
    pub fn new(guest: QuotaPolicy, member: QuotaPolicy, premium: QuotaPolicy) -> Result<Self, String> {
        for (expected, policy) in [
            (Tier::Guest, &guest),
            (Tier::Member, &member),
            (Tier::Premium, &premium),
        ] {
            if policy.tier != expected {
                return Err(format!(
                    "policy for {} placed in the {} slot",
                    policy.tier, expected
                ));
            }
        }
        Ok(Self {
            guest,
            member,
            premium,
        })
    }

    /// Build a table from per-tier allowances sharing one window.
    pub fn with_allowances(
        guest: u32,
        member: u32,
        premium: u32,
        window_secs: u64,
    ) -> Result<Self, String> {
        Self::new(
            QuotaPolicy::new(Tier::Guest, guest, window_secs)?,
            QuotaPolicy::new(Tier::Member, member, window_secs)?,
            QuotaPolicy::new(Tier::Premium, premium, window_secs)?,
        )
    }

    pub fn get(&self, tier: Tier) -> &QuotaPolicy {
        match tier {
            Tier::Guest => &self.guest,
            Tier::Member => &self.member,
            Tier::Premium => &self.premium,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &QuotaPolicy> {
        [&self.guest, &self.member, &self.premium].into_iter()
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        let policy = |tier, allowance| QuotaPolicy {
            tier,
            allowance,
            window_secs: DEFAULT_WINDOW_SECS,
        };
        Self {
            guest: policy(Tier::Guest, DEFAULT_GUEST_ALLOWANCE),
            member: policy(Tier::Member, DEFAULT_MEMBER_ALLOWANCE),
            premium: policy(Tier::Premium, DEFAULT_PREMIUM_ALLOWANCE),
        }
    }
}
