use async_trait::async_trait;
use mongodb::ClientSession;

use crate::db::Mongo;
use crate::error::SummaryResult;

/// Transaction boundary for one summary update. The stores borrow the
/// transaction handle for every operation so reads and writes share one
/// consistent view.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    type Txn: Send;

    async fn begin(&self) -> SummaryResult<Self::Txn>;
    async fn commit(&self, txn: Self::Txn) -> SummaryResult<()>;
    async fn abort(&self, txn: Self::Txn) -> SummaryResult<()>;
}

#[derive(Clone)]
pub struct MongoUnitOfWork {
    db: Mongo,
}

impl MongoUnitOfWork {
    pub fn new(db: Mongo) -> Self {
        MongoUnitOfWork { db }
    }
}

#[async_trait]
impl UnitOfWork for MongoUnitOfWork {
    type Txn = ClientSession;

    async fn begin(&self) -> SummaryResult<ClientSession> {
        let mut session = self.db.client.start_session().await?;
        session.start_transaction().await?;
        Ok(session)
    }

    async fn commit(&self, mut txn: ClientSession) -> SummaryResult<()> {
        txn.commit_transaction().await?;
        Ok(())
    }

    async fn abort(&self, mut txn: ClientSession) -> SummaryResult<()> {
        txn.abort_transaction().await?;
        Ok(())
    }
}
