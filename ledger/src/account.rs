//! Account number generation.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use passbook_common::{AccountNumber, LedgerError, Result, ACCOUNT_NUMBER_LENGTH};
use passbook_store::{AccountFilter, UnitOfWork};

/// Draws random account numbers and checks them for uniqueness.
pub struct AccountNumberGenerator {
    rng: Mutex<StdRng>,
}

impl AccountNumberGenerator {
    /// Create a generator seeded from OS entropy.
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    /// Create a reproducible generator.
    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    /// Create a generator over an existing RNG.
    pub fn from_rng(rng: StdRng) -> Self {
        Self {
            rng: Mutex::new(rng),
        }
    }

    /// Draw one candidate number.
    pub fn draw(&self) -> Result<AccountNumber> {
        let mut digits = [0u8; ACCOUNT_NUMBER_LENGTH];
        {
            let mut rng = self.rng.lock();
            for digit in digits.iter_mut() {
                *digit = rng.gen_range(0..10);
            }
        }
        AccountNumber::from_digits(&digits)
    }

    /// Draw numbers until one is unused, soft-deleted accounts included.
    ///
    /// Fails with [`LedgerError::Exhaustion`] after `attempts` collisions.
    pub async fn assign(&self, uow: &mut dyn UnitOfWork, attempts: u32) -> Result<AccountNumber> {
        for attempt in 1..=attempts {
            let candidate = self.draw()?;
            let taken = uow
                .count_accounts(&AccountFilter::by_number(candidate.clone()).including_deleted())
                .await?;

            if taken == 0 {
                debug!(account = %candidate, attempt, "Assigned account number");
                return Ok(candidate);
            }

            warn!(account = %candidate, attempt, "Account number collision");
        }

        Err(LedgerError::Exhaustion {
            what: "unique account number".to_string(),
            attempts,
        })
    }
}

impl Default for AccountNumberGenerator {
    fn default() -> Self {
        Self::new()
    }
}
