use super::{Credential, CredentialStore};
use anyhow::Result;
use dashmap::DashMap;

/// In-process credential store. Contents are lost on restart.
#[derive(Default)]
pub struct MemoryCredentialStore {
    credentials: DashMap<String, Credential>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, subject_id: &str) -> Result<Option<Credential>> {
        Ok(self.credentials.get(subject_id).map(|c| c.clone()))
    }

    fn upsert(&self, credential: &Credential) -> Result<()> {
        self.credentials
            .insert(credential.subject_id.clone(), credential.clone());
        Ok(())
    }

    fn delete(&self, subject_id: &str) -> Result<bool> {
        Ok(self.credentials.remove(subject_id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_upsert_get_delete() {
        let store = MemoryCredentialStore::new();
        let credential = Credential {
            subject_id: "u1".to_string(),
            access_token: "at".to_string(),
            refresh_token: None,
            expires_at: None,
            scopes: BTreeSet::new(),
        };

        store.upsert(&credential).unwrap();
        assert_eq!(store.get("u1").unwrap(), Some(credential));
        assert!(store.delete("u1").unwrap());
        assert!(!store.delete("u1").unwrap());
        assert!(store.get("u1").unwrap().is_none());
    }
}
