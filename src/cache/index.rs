//! Runtime registry of secondary-index descriptors.
//!
//! Each indexed field of a stored value is described once, at startup, by an
//! [`IndexField`]: a name plus an extractor returning the field's key tagged
//! by its integer width. The engine iterates the registry uniformly when a
//! table run heads to the LSM, emitting one `(field, key)` entry per
//! descriptor per value.

/// A secondary-index key, tagged by the underlying integer width.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum IndexValue {
    /// 64-bit indexed field.
    U64(u64),
    /// 128-bit indexed field.
    U128(u128),
}

/// Descriptor of one indexed field of `V`.
pub struct IndexField<V> {
    name: &'static str,
    extract: fn(&V) -> IndexValue,
}

impl<V> IndexField<V> {
    /// Describe an indexed field.
    pub fn new(name: &'static str, extract: fn(&V) -> IndexValue) -> Self {
        Self { name, extract }
    }

    /// The field's name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Extract this field's index key from `value`.
    pub fn extract(&self, value: &V) -> IndexValue {
        (self.extract)(value)
    }
}

/// The set of indexed fields for one value type.
pub struct IndexRegistry<V> {
    fields: Vec<IndexField<V>>,
}

impl<V> IndexRegistry<V> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Register an indexed field. Names must be unique.
    pub fn register(&mut self, field: IndexField<V>) {
        assert!(
            self.fields.iter().all(|f| f.name != field.name),
            "duplicate index field"
        );
        self.fields.push(field);
    }

    /// The registered descriptors, in registration order.
    pub fn fields(&self) -> &[IndexField<V>] {
        &self.fields
    }

    /// Number of registered fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether no fields are registered.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Emit every `(field, key)` index entry for `value`.
    pub fn entries<'a>(
        &'a self,
        value: &'a V,
    ) -> impl Iterator<Item = (&'static str, IndexValue)> + 'a {
        self.fields
            .iter()
            .map(move |field| (field.name, field.extract(value)))
    }
}

impl<V> Default for IndexRegistry<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Transfer {
        id: u128,
        debit_account: u128,
        ledger: u64,
    }

    fn registry() -> IndexRegistry<Transfer> {
        let mut registry = IndexRegistry::new();
        registry.register(IndexField::new("id", |t: &Transfer| IndexValue::U128(t.id)));
        registry.register(IndexField::new("debit_account", |t: &Transfer| {
            IndexValue::U128(t.debit_account)
        }));
        registry.register(IndexField::new("ledger", |t: &Transfer| {
            IndexValue::U64(t.ledger)
        }));
        registry
    }

    #[test]
    fn test_entries_cover_every_field() {
        let registry = registry();
        let transfer = Transfer {
            id: 10,
            debit_account: 20,
            ledger: 30,
        };

        let entries: Vec<_> = registry.entries(&transfer).collect();
        assert_eq!(
            entries,
            vec![
                ("id", IndexValue::U128(10)),
                ("debit_account", IndexValue::U128(20)),
                ("ledger", IndexValue::U64(30)),
            ]
        );
    }

    #[test]
    fn test_width_tags() {
        let registry = registry();
        let transfer = Transfer {
            id: 1,
            debit_account: 2,
            ledger: 3,
        };
        let widths: Vec<bool> = registry
            .entries(&transfer)
            .map(|(_, key)| matches!(key, IndexValue::U128(_)))
            .collect();
        assert_eq!(widths, vec![true, true, false]);
    }

    #[test]
    #[should_panic(expected = "duplicate index field")]
    fn test_duplicate_name_panics() {
        let mut registry = registry();
        registry.register(IndexField::new("ledger", |t: &Transfer| {
            IndexValue::U64(t.ledger)
        }));
    }

    #[test]
    fn test_empty_registry() {
        let registry: IndexRegistry<Transfer> = IndexRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
    }
}
