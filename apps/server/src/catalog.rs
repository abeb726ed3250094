use std::collections::BTreeMap;

use crate::error::AppError;
use crate::models::Field;
use crate::store::Store;

/// Field reference data, loaded once at startup and shared by `Arc`.
#[derive(Debug, Clone)]
pub struct FieldCatalog {
    fields: BTreeMap<i64, Field>,
}

impl FieldCatalog {
    pub fn new(fields: Vec<Field>) -> Self {
        Self {
            fields: fields.into_iter().map(|f| (f.id, f)).collect(),
        }
    }

    pub async fn load(store: &dyn Store) -> Result<Self, AppError> {
        let fields = store.list_fields().await?;
        tracing::info!("Loaded {} fields into catalog", fields.len());
        Ok(Self::new(fields))
    }

    pub fn get(&self, id: i64) -> Option<&Field> {
        self.fields.get(&id)
    }

    pub fn require(&self, id: i64) -> Result<&Field, AppError> {
        self.get(id)
            .ok_or_else(|| AppError::Validation(format!("Unknown field {}", id)))
    }

    /// Ordered by field id.
    pub fn all(&self) -> impl Iterator<Item = &Field> {
        self.fields.values()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;

    #[tokio::test]
    async fn test_load_from_seeded_store() {
        let store = SqliteStore::in_memory().await;
        let catalog = FieldCatalog::load(&store).await.unwrap();
        assert_eq!(catalog.len(), 5);

        let big = catalog.require(5).unwrap();
        assert_eq!(big.price_pre, 1500);
        assert_eq!(big.price_post, 2000);
        assert_eq!(big.external_id, "court-05");
    }

    #[test]
    fn test_unknown_field_is_validation_error() {
        let catalog = crate::testing::catalog();
        assert!(matches!(catalog.require(99), Err(AppError::Validation(_))));
        let ids: Vec<i64> = catalog.all().map(|f| f.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
