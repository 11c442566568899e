//! Key to logical table routing.

use crate::error::{ShardError, ShardResult};
use crate::models::validate_identifier;
use std::borrow::Cow;
use std::hash::Hasher;

/// A value that can route a row to a logical table.
///
/// Integers route by their decimal text, so `42` and `"42"` land together.
pub trait ShardKey {
    fn key_bytes(&self) -> Cow<'_, [u8]>;
}

impl ShardKey for str {
    fn key_bytes(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(self.as_bytes())
    }
}

impl ShardKey for String {
    fn key_bytes(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(self.as_bytes())
    }
}

impl<K: ShardKey + ?Sized> ShardKey for &K {
    fn key_bytes(&self) -> Cow<'_, [u8]> {
        (**self).key_bytes()
    }
}

macro_rules! integer_shard_key {
    ($($ty:ty),+) => {
        $(
            impl ShardKey for $ty {
                fn key_bytes(&self) -> Cow<'_, [u8]> {
                    Cow::Owned(self.to_string().into_bytes())
                }
            }
        )+
    };
}

integer_shard_key!(i32, i64, u32, u64, usize);

/// Physical table name: `<prefix>_<index zero-padded to 3 digits>`.
pub fn physical_table_name(prefix: &str, index: u32) -> String {
    format!("{}_{:03}", prefix, index)
}

/// Routes keys of one logical table to its partitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRouter {
    name: String,
    suffix_count: u32,
}

impl TableRouter {
    pub fn new(name: impl Into<String>, suffix_count: u32) -> ShardResult<Self> {
        let name = name.into();
        validate_identifier(&name)
            .map_err(|_| ShardError::config(format!("Invalid sharding table name '{}'", name)))?;
        if suffix_count == 0 {
            return Err(ShardError::config(format!(
                "Sharding table '{}' must have a suffix_count greater than 0",
                name
            )));
        }
        Ok(Self { name, suffix_count })
    }

    /// Logical table name prefix.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn suffix_count(&self) -> u32 {
        self.suffix_count
    }

    /// Logical index for `key`: 64-bit FNV-1a of the key bytes, modulo the
    /// suffix count.
    ///
    /// Rows are physically placed by this function. It must never change
    /// once data exists; a different function requires migrating every shard.
    pub fn index_for_key<K: ShardKey + ?Sized>(&self, key: &K) -> u32 {
        let mut hasher = fnv::FnvHasher::default();
        hasher.write(&key.key_bytes());
        (hasher.finish() % u64::from(self.suffix_count)) as u32
    }

    /// Fail unless `index` is a valid logical index of this table.
    pub fn check_index(&self, index: u32) -> ShardResult<()> {
        if index >= self.suffix_count {
            return Err(ShardError::invalid_input(format!(
                "Table index {} out of range for '{}' (suffix_count {})",
                index, self.name, self.suffix_count
            )));
        }
        Ok(())
    }

    /// Physical table name for an explicit logical index.
    pub fn physical_table(&self, index: u32) -> ShardResult<String> {
        self.check_index(index)?;
        Ok(physical_table_name(&self.name, index))
    }

    /// Logical index and physical table name for `key`.
    pub fn resolve<K: ShardKey + ?Sized>(&self, key: &K) -> (u32, String) {
        let index = self.index_for_key(key);
        (index, physical_table_name(&self.name, index))
    }

    /// Every physical table name, in index order.
    pub fn physical_tables(&self) -> impl Iterator<Item = String> + '_ {
        (0..self.suffix_count).map(|i| physical_table_name(&self.name, i))
    }
}
