mod postgres;

pub(crate) use postgres::PgSyncDao;
