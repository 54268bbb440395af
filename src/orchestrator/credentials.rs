use crate::atlas::Credential;

#[derive(Debug, Clone)]
struct Slot {
    credential: Credential,
    in_use: bool,
}

/// Ordered pool of API credentials.
///
/// `acquire` hands out the first credential not yet used in the current
/// cycle. Once every slot is taken the pool reports exhaustion until
/// `reset_all` starts a new cycle.
#[derive(Debug, Clone)]
pub struct CredentialPool {
    slots: Vec<Slot>,
}

impl CredentialPool {
    pub fn new(credentials: Vec<Credential>) -> Self {
        Self {
            slots: credentials
                .into_iter()
                .map(|credential| Slot {
                    credential,
                    in_use: false,
                })
                .collect(),
        }
    }

    pub fn acquire(&mut self) -> Option<Credential> {
        let slot = self.slots.iter_mut().find(|s| !s.in_use)?;
        slot.in_use = true;
        Some(slot.credential.clone())
    }

    /// Return a credential to the pool so it can be acquired again.
    pub fn release(&mut self, credential: &Credential) {
        if let Some(slot) = self.slots.iter_mut().find(|s| &s.credential == credential) {
            slot.in_use = false;
        }
    }

    pub fn reset_all(&mut self) {
        for slot in &mut self.slots {
            slot.in_use = false;
        }
    }

    pub fn available(&self) -> usize {
        self.slots.iter().filter(|s| !s.in_use).count()
    }

    /// Number of credentials in the pool, used or not.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}
