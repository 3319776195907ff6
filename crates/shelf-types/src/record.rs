//! The [`Record`] trait: static routing from a Rust type to its bucket.

use std::borrow::Cow;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// A type that can be persisted in its own bucket.
///
/// The bucket is chosen from the type itself, never from the value, so two
/// values of the same type always land in the same bucket. By default the
/// bucket is named after the simple type name (`app::model::User` is stored
/// in `User`); override [`Record::bucket_name`] or register an explicit name
/// on the store when two types in different modules share a simple name.
///
/// ```
/// use serde::{Deserialize, Serialize};
/// use shelf_types::Record;
///
/// #[derive(Serialize, Deserialize)]
/// struct User {
///     id: u64,
///     name: String,
/// }
///
/// impl Record for User {
///     fn indexes() -> &'static [&'static str] {
///         &["name"]
///     }
/// }
///
/// assert_eq!(User::bucket_name(), "User");
/// ```
pub trait Record: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Serialized field holding the record's identity.
    const ID_FIELD: &'static str = "id";

    /// Name of the bucket this type is stored in.
    fn bucket_name() -> Cow<'static, str> {
        Cow::Borrowed(simple_type_name::<Self>())
    }

    /// Fields with a secondary index, answered without a full scan.
    fn indexes() -> &'static [&'static str] {
        &[]
    }

    /// Indexed fields whose values must be distinct across records.
    fn unique() -> &'static [&'static str] {
        &[]
    }
}

/// Unqualified name of `T`: module path and generic arguments removed.
///
/// `alloc::vec::Vec<u8>` becomes `Vec`, `app::model::User` becomes `User`.
pub fn simple_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = match full.find('<') {
        Some(pos) => &full[..pos],
        None => full,
    };
    let base = base.trim_start_matches('&').trim_start_matches("mut ");
    match base.rfind("::") {
        Some(pos) => &base[pos + 2..],
        None => base,
    }
}
