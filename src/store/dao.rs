mod impls;
pub(crate) mod traits;

#[cfg(test)]
pub(crate) mod mock;

pub(crate) use impls::PgSyncDao;
pub(crate) use traits::SyncDao;
#[cfg(test)]
pub(crate) use traits::{JobDao, LaunchClaim, TaskDao};
