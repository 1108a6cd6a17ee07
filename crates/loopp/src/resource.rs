//! Named, closeable resource handles and aggregate teardown.
//!
//! Every registration or dial performed by the bridge produces a
//! [`Resource`]: a closeable handle tagged with a diagnostic name. A
//! resource is owned by whichever bridge step created it until it is pushed
//! into a [`Resources`] set; the set is what gets rolled back when a later
//! construction step fails, and what is eventually handed to the caller so
//! the whole session can be torn down together.
//!
//! Teardown never stops early: [`Resources::close_all`] attempts to close
//! every entry even when some of them fail, and reports each failure by
//! resource name in the aggregated [`Error::Teardown`].

use loopp_tonic_core::{Error, Result};
use std::fmt;
use tokio::sync::Mutex;

/// An asynchronously closeable handle.
///
/// Implemented by server handles, client connections, and any dependent
/// domain object whose lifetime is scoped to a bridge component.
#[tonic::async_trait]
pub trait Closeable: Send + Sync {
    async fn close(&self) -> Result<()>;
}

/// A named, closeable handle produced by a bridge step.
///
/// The name identifies the resource in teardown errors and logs; it is not
/// required to be unique.
pub struct Resource {
    name: String,
    closer: Box<dyn Closeable>,
}

impl Resource {
    pub fn new(name: impl Into<String>, closer: impl Closeable + 'static) -> Self {
        Self {
            name: name.into(),
            closer: Box::new(closer),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn close(&self) -> Result<()> {
        self.closer.close().await
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource").field("name", &self.name).finish()
    }
}

/// An ordered set of resources, closed in aggregate.
#[derive(Debug, Default)]
pub struct Resources(Vec<Resource>);

impl Resources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, resource: Resource) {
        self.0.push(resource);
    }

    /// Moves every resource out of `other` into this set, preserving order.
    pub fn absorb(&mut self, other: Resources) {
        self.0.extend(other.0);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Closes every resource in reverse registration order.
    ///
    /// Later resources may depend on earlier ones, so the newest is closed
    /// first. A failure never aborts the sweep: all remaining resources are
    /// still closed, and every failure is collected into
    /// [`Error::Teardown`].
    pub async fn close_all(self) -> Result<()> {
        let mut failures = Vec::new();
        for resource in self.0.into_iter().rev() {
            if let Err(err) = resource.close().await {
                #[cfg(feature = "tracing")]
                tracing::warn!(resource = %resource.name(), error = %err, "failed to close resource");
                failures.push((resource.name().to_string(), err.to_string()));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Teardown { failures })
        }
    }
}

impl From<Vec<Resource>> for Resources {
    fn from(resources: Vec<Resource>) -> Self {
        Self(resources)
    }
}

/// Dependent closers tracked by a server shim.
///
/// A server owns resources whose lifetime is scoped to it (a served
/// sub-plugin, a dialed-back provider connection). Its `Close` RPC handler
/// drains this set through the same aggregate teardown as everything else.
#[derive(Debug, Default)]
pub struct DepSet(Mutex<Resources>);

impl DepSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, resource: Resource) {
        self.0.lock().await.push(resource);
    }

    pub async fn absorb(&self, resources: Resources) {
        self.0.lock().await.absorb(resources);
    }

    /// Drains and closes every tracked dependent.
    pub async fn close_all(&self) -> Result<()> {
        let resources = std::mem::take(&mut *self.0.lock().await);
        resources.close_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FlagCloser {
        closed: Arc<AtomicBool>,
        log: Arc<std::sync::Mutex<Vec<String>>>,
        name: &'static str,
        fail: bool,
    }

    #[tonic::async_trait]
    impl Closeable for FlagCloser {
        async fn close(&self) -> Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            self.log.lock().unwrap().push(self.name.to_string());
            if self.fail {
                Err(Error::serve(format!("{} refused to close", self.name)))
            } else {
                Ok(())
            }
        }
    }

    fn tracked(
        name: &'static str,
        fail: bool,
        log: &Arc<std::sync::Mutex<Vec<String>>>,
    ) -> (Resource, Arc<AtomicBool>) {
        let closed = Arc::new(AtomicBool::new(false));
        let resource = Resource::new(
            name,
            FlagCloser {
                closed: Arc::clone(&closed),
                log: Arc::clone(log),
                name,
                fail,
            },
        );
        (resource, closed)
    }

    #[tokio::test]
    async fn close_all_closes_everything_in_reverse_order() {
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut resources = Resources::new();
        let (a, a_closed) = tracked("a", false, &log);
        let (b, b_closed) = tracked("b", false, &log);
        let (c, c_closed) = tracked("c", false, &log);
        resources.push(a);
        resources.push(b);
        resources.push(c);

        resources.close_all().await.unwrap();

        assert!(a_closed.load(Ordering::SeqCst));
        assert!(b_closed.load(Ordering::SeqCst));
        assert!(c_closed.load(Ordering::SeqCst));
        assert_eq!(*log.lock().unwrap(), vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn close_all_continues_past_failures_and_reports_them() {
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut resources = Resources::new();
        let (a, a_closed) = tracked("a", false, &log);
        let (b, b_closed) = tracked("b", true, &log);
        let (c, c_closed) = tracked("c", false, &log);
        resources.push(a);
        resources.push(b);
        resources.push(c);

        let err = resources.close_all().await.unwrap_err();

        // Every resource was still closed.
        assert!(a_closed.load(Ordering::SeqCst));
        assert!(b_closed.load(Ordering::SeqCst));
        assert!(c_closed.load(Ordering::SeqCst));

        match err {
            Error::Teardown { failures } => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].0, "b");
                assert!(failures[0].1.contains("refused to close"));
            }
            other => panic!("expected teardown error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn dep_set_drains_on_close() {
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let deps = DepSet::new();
        let (a, a_closed) = tracked("a", false, &log);
        deps.push(a).await;

        deps.close_all().await.unwrap();
        assert!(a_closed.load(Ordering::SeqCst));

        // A second sweep is a no-op.
        deps.close_all().await.unwrap();
        assert_eq!(log.lock().unwrap().len(), 1);
    }
}
