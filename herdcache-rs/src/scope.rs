//! Provides the identity which namespaces a coordinator.
//!
//! Each [Coordinator](crate::coordinator::Coordinator) belongs to exactly one scope. The scope
//! determines the name of the distributed lock, which is `lock_` followed by the scope name.
//! Note that the lock name does **not** include the key being populated. Therefore all misses
//! within a scope contend for one lock, even if they concern unrelated keys. A populate for key
//! **A** in one process makes a populate for key **B** in another process wait. This keeps the
//! number of lock keys in the shared store constant, but costs throughput for scopes with many
//! independently missing keys. Such scopes should rather be split into several coordinators.
//!
//! # Examples
//!
//! ```
//! # use herdcache::scope::Scope;
//! struct StudyWorker;
//!
//! assert_eq!(Scope::of::<StudyWorker>().lock_name(), "lock_StudyWorker");
//! assert_eq!(Scope::new("users").lock_name(), "lock_users");
//! ```
use std::fmt;
use std::fmt::Display;

/// Names the scope of a coordinator.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Scope {
    name: String,
}

impl Scope {
    /// Creates a scope with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Scope { name: name.into() }
    }

    /// Creates a scope named after the simple name of the given type.
    ///
    /// Module paths and generic parameters are stripped, therefore `my_app::cache::UserWorker<T>`
    /// yields a scope named `UserWorker`.
    pub fn of<T: ?Sized>() -> Self {
        let full_name = std::any::type_name::<T>();
        let without_generics = full_name.split('<').next().unwrap_or(full_name);
        let simple_name = without_generics
            .rsplit("::")
            .next()
            .unwrap_or(without_generics);

        Scope::new(simple_name)
    }

    /// Returns the name of this scope.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the name of the distributed lock shared by all coordinators of this scope.
    pub fn lock_name(&self) -> String {
        format!("lock_{}", self.name)
    }
}

impl Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use crate::scope::Scope;

    struct Wrapper<T>(std::marker::PhantomData<T>);

    #[test]
    fn type_names_are_simplified() {
        assert_eq!(Scope::of::<String>().name(), "String");
        assert_eq!(Scope::of::<Wrapper<Vec<u8>>>().name(), "Wrapper");
        assert_eq!(Scope::of::<Wrapper<u8>>().lock_name(), "lock_Wrapper");
    }

    #[test]
    fn scopes_display_their_name() {
        assert_eq!(format!("{}", Scope::new("users")), "users");
    }
}
