use std::any::Any;
use std::fmt;
use std::sync::Arc;

use shelf_types::BucketId;

/// A saved record, published to the members of its bucket's group.
///
/// The payload is shared, not copied, between members. Use
/// [`ChangeEvent::downcast`] to get it back as its concrete type.
#[derive(Clone)]
pub struct ChangeEvent {
    bucket: BucketId,
    type_name: &'static str,
    payload: Arc<dyn Any + Send + Sync>,
}

impl ChangeEvent {
    /// Wrap `value` as an event for `bucket`.
    pub fn new<T: Any + Send + Sync>(bucket: BucketId, value: T) -> Self {
        Self::from_arc(bucket, Arc::new(value))
    }

    /// Wrap an already shared `value` as an event for `bucket`.
    pub fn from_arc<T: Any + Send + Sync>(bucket: BucketId, value: Arc<T>) -> Self {
        Self {
            bucket,
            type_name: std::any::type_name::<T>(),
            payload: value,
        }
    }

    /// Bucket the record was saved to.
    pub fn bucket(&self) -> &BucketId {
        &self.bucket
    }

    /// Full type name of the payload.
    pub fn payload_type_name(&self) -> &'static str {
        self.type_name
    }

    /// Returns `true` if the payload is a `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.payload.is::<T>()
    }

    /// The payload as a `T`, or `None` if it holds another type.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.payload).downcast::<T>().ok()
    }
}

impl fmt::Debug for ChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeEvent")
            .field("bucket", &self.bucket)
            .field("payload_type", &self.type_name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct User {
        name: String,
    }

    fn bucket() -> BucketId {
        BucketId::new("User").unwrap()
    }

    #[test]
    fn downcast_to_payload_type() {
        let event = ChangeEvent::new(bucket(), User { name: "bob".into() });
        assert!(event.is::<User>());
        assert_eq!(*event.downcast::<User>().unwrap(), User { name: "bob".into() });
        assert_eq!(event.bucket().as_str(), "User");
        assert!(event.payload_type_name().ends_with("User"));
    }

    #[test]
    fn downcast_to_other_type_fails() {
        let event = ChangeEvent::new(bucket(), 7u32);
        assert!(event.downcast::<User>().is_none());
        assert!(!event.is::<User>());
    }

    #[test]
    fn clones_share_payload() {
        let value = Arc::new(User { name: "ann".into() });
        let event = ChangeEvent::from_arc(bucket(), Arc::clone(&value));
        let copy = event.clone();
        assert!(Arc::ptr_eq(&copy.downcast::<User>().unwrap(), &value));
        assert!(format!("{event:?}").contains("ChangeEvent"));
    }
}
