use super::node::NodeId;
use crate::constants::{
    GET_PEERS_KEYWIDTH, GET_PEERS_MAX_TOKENS, MAX_KEYWIDTH, PING_COST, PING_KEYWIDTH,
    PING_MAX_TOKENS, REPLENISH_INCREMENT, RX_KEYWIDTH, RX_MAX_TOKENS,
};
use std::collections::VecDeque;

/// Shape of one [`RateLimiter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterConfig {
    /// Number of high key bits selecting a bucket.
    pub keywidth: u8,
    /// Tokens a key starts with and never exceeds.
    pub max_tokens: u8,
    /// Tokens taken by [`RateLimiter::check`].
    pub cost: u8,
    /// Tokens returned to every key per epoch.
    pub increment: u8,
}

impl LimiterConfig {
    /// Inbound datagrams, keyed by source address.
    pub fn rx() -> Self {
        Self {
            keywidth: RX_KEYWIDTH,
            max_tokens: RX_MAX_TOKENS,
            cost: 1,
            increment: REPLENISH_INCREMENT,
        }
    }

    /// Outbound pings, keyed by destination address.
    pub fn ping() -> Self {
        Self {
            keywidth: PING_KEYWIDTH,
            max_tokens: PING_MAX_TOKENS,
            cost: PING_COST,
            increment: REPLENISH_INCREMENT,
        }
    }

    /// Forwarded `get_peers` pursuits, keyed by source address and infohash.
    pub fn get_peers() -> Self {
        Self {
            keywidth: GET_PEERS_KEYWIDTH,
            max_tokens: GET_PEERS_MAX_TOKENS,
            cost: 1,
            increment: REPLENISH_INCREMENT,
        }
    }
}

/// Per-key token buckets with bounded memory.
///
/// Keys that have never been charged, or have fully recovered, hold no entry:
/// they are implicitly full. Entries live in `2^keywidth` small deques picked
/// by the key's high bits, with the most recently charged key at the front.
#[derive(Debug)]
pub struct RateLimiter {
    config: LimiterConfig,
    buckets: Vec<VecDeque<(u32, u8)>>,
}

impl RateLimiter {
    /// Builds a limiter, clamping `keywidth` to [`MAX_KEYWIDTH`].
    pub fn new(mut config: LimiterConfig) -> Self {
        config.keywidth = config.keywidth.min(MAX_KEYWIDTH);
        Self {
            config,
            buckets: vec![VecDeque::new(); 1 << config.keywidth],
        }
    }

    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    fn bucket_of(&self, key: u32) -> usize {
        key.checked_shr(32 - u32::from(self.config.keywidth))
            .unwrap_or(0) as usize
    }

    /// Charges `key` the configured cost.
    pub fn check(&mut self, key: u32) -> bool {
        self.check_with_cost(key, self.config.cost)
    }

    /// Charges `key` `cost` tokens. Refused charges change nothing.
    pub fn check_with_cost(&mut self, key: u32, cost: u8) -> bool {
        let max = self.config.max_tokens;
        if cost > max {
            return false;
        }

        let index = self.bucket_of(key);
        let bucket = &mut self.buckets[index];

        let Some(pos) = bucket.iter().position(|&(k, _)| k == key) else {
            if cost > 0 {
                bucket.push_front((key, max - cost));
            }
            return true;
        };

        let remaining = bucket[pos].1;
        if remaining < cost {
            return false;
        }

        bucket.remove(pos);
        let remaining = remaining - cost;
        if remaining < max {
            bucket.push_front((key, remaining));
        }

        true
    }

    /// Tokens `key` could currently spend.
    pub fn remaining(&self, key: u32) -> u8 {
        self.buckets[self.bucket_of(key)]
            .iter()
            .find(|&&(k, _)| k == key)
            .map_or(self.config.max_tokens, |&(_, tokens)| tokens)
    }

    /// Returns the per-epoch increment to every key, forgetting keys that are
    /// full again.
    pub fn replenish_epoch(&mut self) {
        let LimiterConfig {
            max_tokens,
            increment,
            ..
        } = self.config;

        for bucket in &mut self.buckets {
            bucket.retain_mut(|(_, tokens)| {
                *tokens = tokens.saturating_add(increment);
                *tokens < max_tokens
            });
        }
    }

    /// Number of keys below the maximum.
    pub fn len(&self) -> usize {
        self.buckets.iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(VecDeque::is_empty)
    }
}

/// Key of the `get_peers` limiter: the source address folded with the
/// infohash, so one node can pursue many infohashes but not one too often.
pub fn get_peers_key(ip_key: u32, info_hash: &NodeId) -> u32 {
    let b = info_hash.as_bytes();
    ip_key ^ u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_tokens: u8) -> RateLimiter {
        RateLimiter::new(LimiterConfig {
            keywidth: 4,
            max_tokens,
            cost: 1,
            increment: 1,
        })
    }

    #[test]
    fn test_zero_cost_on_absent_key_is_noop() {
        let mut limiter = limiter(4);
        assert!(limiter.check_with_cost(7, 0));
        assert!(limiter.is_empty());
    }

    #[test]
    fn test_full_recovery_drops_entry() {
        let mut limiter = limiter(4);
        assert!(limiter.check_with_cost(7, 2));
        assert_eq!(limiter.remaining(7), 2);

        limiter.replenish_epoch();
        assert_eq!(limiter.remaining(7), 3);
        assert_eq!(limiter.len(), 1);

        limiter.replenish_epoch();
        assert_eq!(limiter.remaining(7), 4);
        assert!(limiter.is_empty());
    }

    #[test]
    fn test_move_to_front() {
        let mut limiter = limiter(4);
        // same high bits, same bucket
        assert!(limiter.check(0x0000_0001));
        assert!(limiter.check(0x0000_0002));
        assert_eq!(limiter.buckets[0].front(), Some(&(2, 3)));

        assert!(limiter.check(0x0000_0001));
        assert_eq!(limiter.buckets[0].front(), Some(&(1, 2)));
        assert_eq!(limiter.len(), 2);
    }

    #[test]
    fn test_bucket_selection() {
        let limiter = limiter(4);
        assert_eq!(limiter.bucket_of(0xf000_0000), 15);
        assert_eq!(limiter.bucket_of(0x1fff_ffff), 1);

        let flat = RateLimiter::new(LimiterConfig {
            keywidth: 0,
            ..LimiterConfig::rx()
        });
        assert_eq!(flat.bucket_of(0xffff_ffff), 0);
    }

    #[test]
    fn test_keywidth_is_clamped() {
        let mut wide = RateLimiter::new(LimiterConfig {
            keywidth: 64,
            ..LimiterConfig::rx()
        });
        assert_eq!(wide.config().keywidth, MAX_KEYWIDTH);
        assert_eq!(wide.buckets.len(), 1 << MAX_KEYWIDTH);
        assert_eq!(wide.bucket_of(0xffff_ffff), (1 << MAX_KEYWIDTH) - 1);
        assert!(wide.check(0xffff_ffff));
    }
}
