use std::cmp::Ordering;
use std::net::Ipv6Addr;
use std::time::{Duration, Instant};

use ipnet::Ipv6Net;
use serde::Serialize;

use super::{
    DESIRED_PREFIX_LEN, MAX_PREFERRED_LIFETIME, MAX_VALID_MARGIN_AFTER_PREFERRED,
    MIN_PREFERRED_LIFETIME, MIN_T1, MIN_T1_MARGIN_BEFORE_PREFERRED,
    MIN_T2_MARGIN_BEFORE_PREFERRED,
};

/// A prefix record taken from an IA_Prefix option, along with the IA_PD timers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdPrefix {
    pub prefix: Ipv6Net,
    /// `prefix` widened to /64, `None` when the prefix is longer than /64
    pub adjusted_prefix: Option<Ipv6Net>,
    pub t1: u32,
    pub t2: u32,
    pub preferred_lifetime: u32,
    pub valid_lifetime: u32,
    pub update_time: Instant,
}

impl PdPrefix {
    pub fn new(
        prefix_ip: Ipv6Addr,
        prefix_len: u8,
        t1: u32,
        t2: u32,
        preferred_lifetime: u32,
        valid_lifetime: u32,
        update_time: Instant,
    ) -> Option<Self> {
        let prefix = Ipv6Net::new(prefix_ip, prefix_len).ok()?.trunc();
        Some(Self {
            prefix,
            adjusted_prefix: adjust_prefix(prefix),
            t1,
            t2,
            preferred_lifetime,
            valid_lifetime,
            update_time,
        })
    }

    /// Usable for delegation: at most /64 with a long enough preferred lifetime.
    pub fn is_usable(&self) -> bool {
        self.prefix.prefix_len() <= DESIRED_PREFIX_LEN
            && self.preferred_lifetime >= MIN_PREFERRED_LIFETIME
    }

    pub fn t1_time(&self) -> Instant {
        self.update_time + Duration::from_secs(self.t1.into())
    }

    pub fn t2_time(&self) -> Instant {
        self.update_time + Duration::from_secs(self.t2.into())
    }

    pub fn preferred_expiry(&self) -> Instant {
        self.update_time + Duration::from_secs(self.preferred_lifetime.into())
    }

    /// Bring server supplied lifetimes and T1/T2 into the range the client operates in.
    ///
    /// The preferred lifetime is capped at four hours and the valid lifetime at two
    /// minutes beyond it. Missing T1/T2 default to 0.5 and 0.8 of the preferred
    /// lifetime. With at least 30 minutes of preferred lifetime, T1 is kept within
    /// `[300, PL - 900]` and T2 within `[T1, PL - 360]`. A shorter lifetime means
    /// the server is not extending the lease, so T1 and T2 are bounded by the
    /// lifetime itself and no further renewal happens.
    pub fn adjust_lifetimes(&mut self) {
        self.preferred_lifetime = self.preferred_lifetime.min(MAX_PREFERRED_LIFETIME);
        self.valid_lifetime = self
            .valid_lifetime
            .min(self.preferred_lifetime + MAX_VALID_MARGIN_AFTER_PREFERRED);

        let pl = self.preferred_lifetime;

        if self.t1 == 0 {
            self.t1 = pl / 2;
        }
        if self.t2 == 0 {
            self.t2 = pl * 4 / 5;
        }

        if pl >= MIN_PREFERRED_LIFETIME {
            self.t1 = self.t1.clamp(MIN_T1, pl - MIN_T1_MARGIN_BEFORE_PREFERRED);
            self.t2 = self.t2.clamp(self.t1, pl - MIN_T2_MARGIN_BEFORE_PREFERRED);
        } else if pl >= MIN_T1 {
            self.t1 = self.t1.clamp(MIN_T1, pl);
            self.t2 = self.t2.clamp(self.t1, pl);
        } else {
            self.t1 = pl;
            self.t2 = pl;
        }
    }
}

/// Widen a prefix of length <= 64 to a /64, host bits cleared.
pub fn adjust_prefix(prefix: Ipv6Net) -> Option<Ipv6Net> {
    if prefix.prefix_len() > DESIRED_PREFIX_LEN {
        return None;
    }
    Ipv6Net::new(prefix.network(), DESIRED_PREFIX_LEN)
        .ok()
        .map(|net| net.trunc())
}

/// Order prefixes by their bits up to the shorter length; on a tie the shorter prefix sorts first.
pub fn compare_prefixes(a: &Ipv6Net, b: &Ipv6Net) -> Ordering {
    let min_len = a.prefix_len().min(b.prefix_len());
    let a_bits = u128::from(a.network());
    let b_bits = u128::from(b.network());
    let mask = u128::MAX.checked_shl(128 - u32::from(min_len)).unwrap_or(0);

    (a_bits & mask)
        .cmp(&(b_bits & mask))
        .then(a.prefix_len().cmp(&b.prefix_len()))
}

/// Picks the prefix to pursue among the usable records of one IA_PD.
pub trait PrefixSelector {
    fn select<'a>(&self, candidates: &'a [PdPrefix]) -> Option<&'a PdPrefix>;

    /// Whether `candidate` should replace the currently tracked offer
    fn is_favored_over(&self, candidate: &PdPrefix, current: &PdPrefix) -> bool;
}

/// Favors the numerically smallest adjusted /64 prefix.
#[derive(Debug, Clone, Copy, Default)]
pub struct SmallestAdjustedPrefix;

impl PrefixSelector for SmallestAdjustedPrefix {
    fn select<'a>(&self, candidates: &'a [PdPrefix]) -> Option<&'a PdPrefix> {
        candidates
            .iter()
            .filter(|p| p.is_usable())
            .fold(None, |favored: Option<&PdPrefix>, p| match favored {
                Some(f) if !self.is_favored_over(p, f) => Some(f),
                _ => Some(p),
            })
    }

    fn is_favored_over(&self, candidate: &PdPrefix, current: &PdPrefix) -> bool {
        match (&candidate.adjusted_prefix, &current.adjusted_prefix) {
            (Some(c), Some(f)) => compare_prefixes(c, f) == Ordering::Less,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}

/// Snapshot of the committed lease handed to consumers of the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DelegatedPrefix {
    pub prefix: Ipv6Net,
    pub adjusted_prefix: Ipv6Net,
    pub t1: u32,
    pub t2: u32,
    pub preferred_lifetime: u32,
    pub valid_lifetime: u32,
}

impl DelegatedPrefix {
    pub fn from_pd_prefix(pd: &PdPrefix) -> Option<Self> {
        Some(Self {
            prefix: pd.prefix,
            adjusted_prefix: pd.adjusted_prefix?,
            t1: pd.t1,
            t2: pd.t2,
            preferred_lifetime: pd.preferred_lifetime,
            valid_lifetime: pd.valid_lifetime,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pd(prefix: &str, preferred: u32) -> PdPrefix {
        let net: Ipv6Net = prefix.parse().unwrap();
        PdPrefix::new(
            net.addr(),
            net.prefix_len(),
            0,
            0,
            preferred,
            preferred,
            Instant::now(),
        )
        .unwrap()
    }

    fn adjusted(t1: u32, t2: u32, pl: u32) -> (u32, u32, u32) {
        let mut p = pd("2001:db8::/48", pl);
        p.t1 = t1;
        p.t2 = t2;
        p.adjust_lifetimes();
        (p.t1, p.t2, p.preferred_lifetime)
    }

    #[test]
    fn lifetime_adjustment_table() {
        let cases: &[((u32, u32, u32), (u32, u32, u32))] = &[
            ((0, 0, 1800), (900, 1440, 1800)),
            ((0, 1300, 1800), (900, 1300, 1800)),
            ((800, 0, 1800), (800, 1440, 1800)),
            ((0, 800, 1800), (900, 900, 1800)),
            ((1, 5, 1800), (300, 300, 1800)),
            ((0, 0, 7200), (3600, 5760, 7200)),
            ((2000, 2500, 1800), (900, 1440, 1800)),
            ((1000, 1200, 7200), (1000, 1200, 7200)),
            ((7100, 7150, 7200), (6300, 6840, 7200)),
            ((0, 0, 14500), (7200, 11520, 14400)),
            ((2000, 2500, 14500), (2000, 2500, 14400)),
            ((u32::MAX, u32::MAX, u32::MAX), (13500, 14040, 14400)),
            ((0, 0, 100), (100, 100, 100)),
            ((0, 0, 1000), (500, 800, 1000)),
        ];

        for &(input, expected) in cases {
            assert_eq!(
                adjusted(input.0, input.1, input.2),
                expected,
                "adjusting (T1, T2, PL) = {input:?}"
            );
        }
    }

    #[test]
    fn valid_lifetime_capped_after_preferred() {
        let mut p = pd("2001:db8::/48", 3600);
        p.valid_lifetime = 100_000;
        p.adjust_lifetimes();
        assert_eq!(p.valid_lifetime, 3720);

        let mut p = pd("2001:db8::/48", 20_000);
        p.valid_lifetime = 20_000;
        p.adjust_lifetimes();
        assert_eq!(p.preferred_lifetime, 14400);
        assert_eq!(p.valid_lifetime, 14520);
    }

    #[test]
    fn short_prefix_widened_to_64() {
        let p = pd("2001:1111::/48", 1800);
        assert_eq!(p.adjusted_prefix, Some("2001:1111::/64".parse().unwrap()));

        let p = pd("2001:db8:1:2::/64", 1800);
        assert_eq!(p.adjusted_prefix, Some("2001:db8:1:2::/64".parse().unwrap()));

        let p = pd("2001:db8:1:2:8000::/65", 1800);
        assert_eq!(p.adjusted_prefix, None);
        assert!(!p.is_usable());
    }

    #[test]
    fn prefix_ordering() {
        let a: Ipv6Net = "2001:0::/48".parse().unwrap();
        let b: Ipv6Net = "2001:dad0::/40".parse().unwrap();
        let c: Ipv6Net = "2001:ff::/64".parse().unwrap();
        assert_eq!(compare_prefixes(&a, &b), Ordering::Less);
        assert_eq!(compare_prefixes(&a, &c), Ordering::Less);
        assert_eq!(compare_prefixes(&c, &b), Ordering::Less);

        let short: Ipv6Net = "2001:db8::/32".parse().unwrap();
        let long: Ipv6Net = "2001:db8::/48".parse().unwrap();
        assert_eq!(compare_prefixes(&short, &long), Ordering::Less);
        assert_eq!(compare_prefixes(&long, &long), Ordering::Equal);
    }

    #[test]
    fn selector_picks_smallest_adjusted_prefix() {
        let candidates = vec![
            pd("2001:5:baba:beef::/64", 1800),
            pd("2001:4::/48", 1800),
            pd("2001:ef::/40", 1800),
        ];
        let favored = SmallestAdjustedPrefix.select(&candidates).unwrap();
        assert_eq!(favored.prefix, "2001:4::/48".parse::<Ipv6Net>().unwrap());
    }

    #[test]
    fn selector_skips_unusable() {
        let candidates = vec![
            pd("2001:1::/48", 1799),
            pd("2001:2:0:0:8000::/65", 1800),
            pd("2001:3::/48", 1800),
        ];
        let favored = SmallestAdjustedPrefix.select(&candidates).unwrap();
        assert_eq!(favored.prefix, "2001:3::/48".parse::<Ipv6Net>().unwrap());

        assert!(SmallestAdjustedPrefix.select(&candidates[..2]).is_none());
    }
}
