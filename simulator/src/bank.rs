//! Simulated bank directory.

use passbook_common::{Bank, User};
use passbook_store::InMemoryStore;

/// A bank with the short code scenarios refer to it by.
#[derive(Debug, Clone)]
pub struct SimulatedBank {
    pub code: String,
    pub bank: Bank,
}

/// Bank factory for creating test banks.
pub struct BankFactory;

impl BankFactory {
    /// Create N simulated banks.
    pub fn create_banks(count: usize) -> Vec<SimulatedBank> {
        let bank_names = [
            ("BANK_A", "Alpha Bank"),
            ("BANK_B", "Beta Financial"),
            ("BANK_C", "Central Trust"),
            ("BANK_D", "Delta Holdings"),
            ("BANK_E", "Eastern Bank"),
            ("BANK_F", "First National"),
            ("BANK_G", "Global Finance"),
            ("BANK_H", "Harbor Bank"),
            ("BANK_I", "International Trust"),
            ("BANK_J", "Jade Financial"),
        ];

        (0..count)
            .map(|i| {
                let (code, name) = match bank_names.get(i) {
                    Some((code, name)) => (code.to_string(), name.to_string()),
                    None => (format!("BANK_{}", i + 1), format!("Bank Number {}", i + 1)),
                };
                SimulatedBank {
                    code,
                    bank: Bank::new(name),
                }
            })
            .collect()
    }
}

/// Users and banks seeded into the store before a run.
#[derive(Debug, Clone)]
pub struct Directory {
    pub banks: Vec<SimulatedBank>,
    pub customers: Vec<User>,
    pub admin: User,
}

impl Directory {
    /// Create `banks` banks, `customers` customers and one administrator.
    pub fn generate(banks: usize, customers: usize) -> Self {
        Self {
            banks: BankFactory::create_banks(banks),
            customers: (0..customers).map(|_| User::new()).collect(),
            admin: User::admin(),
        }
    }

    /// Write every user and bank into the store.
    pub async fn seed(&self, store: &InMemoryStore) {
        for simulated in &self.banks {
            store.put_bank(simulated.bank.clone()).await;
        }
        for user in self.customers.iter().chain(std::iter::once(&self.admin)) {
            store.put_user(user.clone()).await;
        }
    }

    /// Find a bank by its short code.
    pub fn bank(&self, code: &str) -> Option<&Bank> {
        self.banks
            .iter()
            .find(|simulated| simulated.code.eq_ignore_ascii_case(code))
            .map(|simulated| &simulated.bank)
    }
}
