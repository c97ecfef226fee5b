//! Request-scoped active tenant.
//!
//! The slot is a tokio task-local established by [`TenantContext::scope`]; each request
//! gets its own scope, so a value set while serving one request is invisible to every other
//! task. Outside a scope there is no tenant and [`TenantContext::set`] fails.

use crate::error::TenancyError;
use crate::tenant::TenantId;
use std::cell::RefCell;
use std::future::Future;

tokio::task_local! {
    static ACTIVE_TENANT: RefCell<Option<TenantId>>;
}

pub struct TenantContext;

impl TenantContext {
    /// Run `fut` with a fresh slot holding `initial`. The slot is dropped when `fut`
    /// completes, errors, or panics.
    pub async fn scope<F>(initial: Option<TenantId>, fut: F) -> F::Output
    where
        F: Future,
    {
        ACTIVE_TENANT.scope(RefCell::new(initial), fut).await
    }

    pub fn set(tenant: TenantId) -> Result<(), TenancyError> {
        ACTIVE_TENANT
            .try_with(|slot| {
                *slot.borrow_mut() = Some(tenant);
            })
            .map_err(|_| TenancyError::NoRequestScope)
    }

    pub fn get() -> Option<TenantId> {
        ACTIVE_TENANT.try_with(|slot| slot.borrow().clone()).ok().flatten()
    }

    pub fn clear() {
        let _ = ACTIVE_TENANT.try_with(|slot| slot.borrow_mut().take());
    }

    /// Run `fut` against the central database: no tenant is visible inside, and the
    /// caller's value is back in place afterward regardless of how `fut` ends.
    pub async fn with_shared<F>(fut: F) -> F::Output
    where
        F: Future,
    {
        ACTIVE_TENANT.scope(RefCell::new(None), fut).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant(id: &str) -> TenantId {
        TenantId::new(id).unwrap()
    }

    #[tokio::test]
    async fn empty_outside_a_scope() {
        assert_eq!(TenantContext::get(), None);
        assert_eq!(TenantContext::set(tenant("acme")), Err(TenancyError::NoRequestScope));
        TenantContext::clear();
    }

    #[tokio::test]
    async fn set_get_clear_within_scope() {
        TenantContext::scope(None, async {
            assert_eq!(TenantContext::get(), None);
            TenantContext::set(tenant("acme")).unwrap();
            assert_eq!(TenantContext::get(), Some(tenant("acme")));
            TenantContext::clear();
            assert_eq!(TenantContext::get(), None);
        })
        .await;
        assert_eq!(TenantContext::get(), None);
    }

    #[tokio::test]
    async fn with_shared_restores_previous_value() {
        TenantContext::scope(Some(tenant("acme")), async {
            let inner = TenantContext::with_shared(async {
                assert_eq!(TenantContext::get(), None);
                TenantContext::set(tenant("beta")).unwrap();
                TenantContext::get()
            })
            .await;
            assert_eq!(inner, Some(tenant("beta")));
            assert_eq!(TenantContext::get(), Some(tenant("acme")));
        })
        .await;
    }

    #[tokio::test]
    async fn with_shared_restores_after_error() {
        TenantContext::scope(Some(tenant("acme")), async {
            let result: Result<(), &str> = TenantContext::with_shared(async { Err("provisioning failed") }).await;
            assert!(result.is_err());
            assert_eq!(TenantContext::get(), Some(tenant("acme")));
        })
        .await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_scopes_never_observe_each_other() {
        let mut tasks = Vec::new();
        for i in 0..32 {
            let id = tenant(&format!("t{i}"));
            tasks.push(tokio::spawn(TenantContext::scope(Some(id.clone()), async move {
                for _ in 0..200 {
                    assert_eq!(TenantContext::get().as_ref(), Some(&id));
                    tokio::task::yield_now().await;
                }
            })));
        }
        for task in tasks {
            task.await.unwrap();
        }
    }
}
