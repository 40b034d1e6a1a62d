//! Request and response types.

mod bigquery;
mod iam;
mod pagination;
mod storage;

pub use bigquery::{
    AccessEntry, Dataset, DatasetListEntry, DatasetReference, ListDatasetsResponse,
    ListTablesResponse, Table, TableListEntry, TableReference,
};
pub use iam::{
    Binding, ListServiceAccountKeysResponse, ListServiceAccountsResponse, Policy, ServiceAccount,
    ServiceAccountKey,
};
pub use pagination::Paginated;
pub use storage::{Bucket, ListBucketsResponse, ListObjectsResponse, Object};

/// Google APIs encode 64-bit integers as JSON strings.
pub(crate) mod int64 {
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Text(String),
        Number(u64),
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
        match Option::<Repr>::deserialize(d)? {
            None => Ok(None),
            Some(Repr::Number(n)) => Ok(Some(n)),
            Some(Repr::Text(s)) => s.parse().map(Some).map_err(serde::de::Error::custom),
        }
    }
}
