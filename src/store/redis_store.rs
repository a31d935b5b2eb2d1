use async_trait::async_trait;
use chrono::Utc;
use redis::{AsyncCommands, Script};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, warn};

use super::{claim_window, ReservationStore};
use crate::error::StoreError;
use crate::models::{
    AreaId, Claim, ClaimId, Occupancy, PatronId, SeatKey, SeatNumber, SessionId, TicketCode,
};
use crate::redis_client::RedisClient;

// SET NX PX is the claim itself; the index only exists so occupied_seats
// does not have to scan the keyspace.
const CLAIM_LUA: &str = r#"
if redis.call('SET', KEYS[1], ARGV[1], 'NX', 'PX', ARGV[2]) then
  redis.call('SADD', KEYS[2], ARGV[3])
  return 1
end
return 0
"#;

// Plain SET drops the TTL, so a committed seat never lapses.
const COMMIT_LUA: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  redis.call('SET', KEYS[1], ARGV[2])
  return 1
end
return 0
"#;

const RELEASE_LUA: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  redis.call('DEL', KEYS[1])
  redis.call('SREM', KEYS[2], ARGV[2])
  return 1
end
return 0
"#;

const OCCUPIED_LUA: &str = r#"
local live = {}
for _, seat in ipairs(redis.call('SMEMBERS', KEYS[1])) do
  if redis.call('EXISTS', ARGV[1] .. seat) == 1 then
    table.insert(live, seat)
  else
    redis.call('SREM', KEYS[1], seat)
  end
end
return live
"#;

/// What a seat key says about a commit whose reply never arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommitRecovery {
    Applied,
    NotApplied,
    Lost,
}

fn commit_recovery(current: Option<&str>, marker: &str, record: &str) -> CommitRecovery {
    match current {
        Some(value) if value == record => CommitRecovery::Applied,
        Some(value) if value == marker => CommitRecovery::NotApplied,
        _ => CommitRecovery::Lost,
    }
}

/// Store backed by Redis. Hold expiry is the key TTL.
///
/// Key layout: `seat:{session}:{area}:{seat}` holds either `held:{claim}`
/// or the JSON occupancy; `seats:{session}:{area}` indexes seat numbers.
pub struct RedisReservationStore {
    redis: RedisClient,
    hold: Duration,
    claim: Script,
    commit: Script,
    release: Script,
    occupied: Script,
}

impl RedisReservationStore {
    pub fn new(redis: RedisClient, hold: Duration) -> Self {
        Self {
            redis,
            hold,
            claim: Script::new(CLAIM_LUA),
            commit: Script::new(COMMIT_LUA),
            release: Script::new(RELEASE_LUA),
            occupied: Script::new(OCCUPIED_LUA),
        }
    }

    fn seat_prefix(session: SessionId, area: AreaId) -> String {
        format!("seat:{}:{}:", session, area)
    }

    fn seat_key(key: &SeatKey) -> String {
        format!("{}{}", Self::seat_prefix(key.session, key.area), key.seat)
    }

    fn index_key(session: SessionId, area: AreaId) -> String {
        format!("seats:{}:{}", session, area)
    }

    fn held_marker(claim: ClaimId) -> String {
        format!("held:{}", claim)
    }
}

#[async_trait]
impl ReservationStore for RedisReservationStore {
    async fn occupied_seats(
        &self,
        session: SessionId,
        area: AreaId,
    ) -> Result<BTreeSet<SeatNumber>, StoreError> {
        let mut conn = self.redis.conn.clone();
        let members: Vec<String> = self
            .occupied
            .key(Self::index_key(session, area))
            .arg(Self::seat_prefix(session, area))
            .invoke_async(&mut conn)
            .await?;

        let mut seats = BTreeSet::new();
        for member in members {
            match member.parse::<SeatNumber>() {
                Ok(seat) => {
                    seats.insert(seat);
                }
                Err(_) => warn!("Ignoring malformed seat index entry {:?}", member),
            }
        }
        Ok(seats)
    }

    async fn try_claim(&self, key: SeatKey, patron: PatronId) -> Result<Claim, StoreError> {
        let id = ClaimId::new();
        let hold_ms = u64::try_from(self.hold.as_millis()).unwrap_or(u64::MAX).max(1);
        let mut conn = self.redis.conn.clone();

        let claimed: i32 = self
            .claim
            .key(Self::seat_key(&key))
            .key(Self::index_key(key.session, key.area))
            .arg(Self::held_marker(id))
            .arg(hold_ms)
            .arg(key.seat)
            .invoke_async(&mut conn)
            .await?;

        if claimed == 0 {
            debug!(seat = %key, "claim refused, seat taken");
            return Err(StoreError::SeatTaken);
        }

        let (claimed_at, expires_at) = claim_window(self.hold);
        Ok(Claim {
            id,
            key,
            patron,
            claimed_at,
            expires_at,
        })
    }

    async fn commit(&self, claim: &Claim, code: &TicketCode) -> Result<Occupancy, StoreError> {
        let occupancy = Occupancy {
            key: claim.key,
            patron: claim.patron,
            ticket_code: code.clone(),
            sold_at: Utc::now(),
        };
        let record = serde_json::to_string(&occupancy)?;
        let marker = Self::held_marker(claim.id);
        let seat_key = Self::seat_key(&claim.key);
        let mut conn = self.redis.conn.clone();

        let committed: Result<i32, redis::RedisError> = self
            .commit
            .key(&seat_key)
            .arg(&marker)
            .arg(&record)
            .invoke_async(&mut conn)
            .await;

        match committed {
            Ok(0) => Err(StoreError::ClaimExpired),
            Ok(_) => Ok(occupancy),
            Err(e) => {
                // The script may have run even though the reply was lost.
                warn!(seat = %claim.key, "Commit reply lost, re-reading seat: {}", e);
                let current: Option<String> = conn.get(&seat_key).await?;
                match commit_recovery(current.as_deref(), &marker, &record) {
                    CommitRecovery::Applied => Ok(occupancy),
                    CommitRecovery::NotApplied => Err(e.into()),
                    CommitRecovery::Lost => Err(StoreError::ClaimExpired),
                }
            }
        }
    }

    async fn release(&self, claim: &Claim) -> Result<(), StoreError> {
        let mut conn = self.redis.conn.clone();
        let released: i32 = self
            .release
            .key(Self::seat_key(&claim.key))
            .key(Self::index_key(claim.key.session, claim.key.area))
            .arg(Self::held_marker(claim.id))
            .arg(claim.key.seat)
            .invoke_async(&mut conn)
            .await?;

        if released == 1 {
            debug!(seat = %claim.key, claim = %claim.id, "claim released");
        }
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize, StoreError> {
        // Redis expires holds on its own; index entries are pruned on read.
        Ok(0)
    }
}
