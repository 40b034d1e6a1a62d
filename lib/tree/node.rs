//! Node identities and the cache keys they read through.

use std::fmt;

/// Top-level service directories inside a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Service {
    /// Object storage: buckets and objects.
    Storage,
    /// Tabular catalog: datasets and tables.
    Bigquery,
    /// Identity service: service accounts.
    Iam,
}

impl Service {
    /// Every service, in listing order.
    pub const ALL: [Self; 3] = [Self::Storage, Self::Bigquery, Self::Iam];

    /// The directory name of this service.
    #[must_use]
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Storage => "storage",
            Self::Bigquery => "bigquery",
            Self::Iam => "iam",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// The resource an access policy is attached to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PolicyScope {
    /// A storage bucket.
    Bucket {
        /// Bucket name.
        bucket: String,
    },
    /// A dataset.
    Dataset {
        /// Owning project.
        project: String,
        /// Dataset id.
        dataset: String,
    },
    /// A table.
    Table {
        /// Owning project.
        project: String,
        /// Dataset id.
        dataset: String,
        /// Table id.
        table: String,
    },
}

impl PolicyScope {
    /// The cache key holding this scope's policy.
    #[must_use]
    pub fn cache_key(&self) -> String {
        match self {
            Self::Bucket { bucket } => keys::bucket_policy(bucket),
            Self::Dataset { project, dataset } => keys::dataset_policy(project, dataset),
            Self::Table {
                project,
                dataset,
                table,
            } => keys::table_policy(project, dataset, table),
        }
    }
}

/// Files whose content is generated rather than read from an object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VirtualFile {
    /// `.meta/bucket.json`
    BucketDescriptor {
        /// Bucket name.
        bucket: String,
    },
    /// `.meta/objects/<object>.json`
    ObjectDescriptor {
        /// Bucket name.
        bucket: String,
        /// Full object name.
        object: String,
    },
    /// `<table>/schema.json`
    TableSchema {
        /// Owning project.
        project: String,
        /// Dataset id.
        dataset: String,
        /// Table id.
        table: String,
    },
    /// `<table>/metadata.json`
    TableMetadata {
        /// Owning project.
        project: String,
        /// Dataset id.
        dataset: String,
        /// Table id.
        table: String,
    },
    /// `<account>/account.json`
    AccountDescriptor {
        /// Owning project.
        project: String,
        /// Account email.
        email: String,
    },
    /// `<account>/keys.json`
    AccountKeys {
        /// Owning project.
        project: String,
        /// Account email.
        email: String,
    },
    /// `iam/policy.json`
    PolicyDocument(PolicyScope),
    /// `iam/by-role/<role>/<member>`, an empty marker.
    RoleMember {
        /// Policy owner.
        scope: PolicyScope,
        /// Raw role name.
        role: String,
        /// Raw member name.
        member: String,
    },
    /// `iam/by-member/<member>/<role>`, an empty marker.
    MemberRole {
        /// Policy owner.
        scope: PolicyScope,
        /// Raw member name.
        member: String,
        /// Raw role name.
        role: String,
    },
}

/// The immutable identity of every node the tree can materialize.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeId {
    /// The mount root.
    Root,
    /// `/<project>`
    Project {
        /// Project id.
        project: String,
    },
    /// `/<project>/<service>`
    Service {
        /// Project id.
        project: String,
        /// Which service.
        service: Service,
    },
    /// A bucket root (empty prefix) or a prefix directory inside it.
    ObjectDir {
        /// Bucket name.
        bucket: String,
        /// Object prefix; empty or ending in `/`.
        prefix: String,
    },
    /// A storage object.
    Object {
        /// Bucket name.
        bucket: String,
        /// Full object name.
        name: String,
    },
    /// `.meta` inside a bucket or prefix directory.
    StorageMeta {
        /// Bucket name.
        bucket: String,
        /// Prefix of the directory holding this `.meta`.
        prefix: String,
    },
    /// `.meta/objects`
    ObjectDescriptors {
        /// Bucket name.
        bucket: String,
        /// Prefix whose objects are described.
        prefix: String,
    },
    /// `/<project>/bigquery/<dataset>`
    Dataset {
        /// Project id.
        project: String,
        /// Dataset id.
        dataset: String,
    },
    /// `<dataset>/.meta`
    DatasetMeta {
        /// Project id.
        project: String,
        /// Dataset id.
        dataset: String,
    },
    /// `<dataset>/<table>`
    Table {
        /// Project id.
        project: String,
        /// Dataset id.
        dataset: String,
        /// Table id.
        table: String,
    },
    /// `<table>/.meta`
    TableMeta {
        /// Project id.
        project: String,
        /// Dataset id.
        dataset: String,
        /// Table id.
        table: String,
    },
    /// `/<project>/iam/<email>`
    ServiceAccount {
        /// Project id.
        project: String,
        /// Account email.
        email: String,
    },
    /// An `iam` directory.
    Policy(PolicyScope),
    /// `iam/by-role`
    PolicyByRole(PolicyScope),
    /// `iam/by-role/<role>`
    PolicyRole {
        /// Policy owner.
        scope: PolicyScope,
        /// Raw role name.
        role: String,
    },
    /// `iam/by-member`
    PolicyByMember(PolicyScope),
    /// `iam/by-member/<member>`
    PolicyMember {
        /// Policy owner.
        scope: PolicyScope,
        /// Raw member name.
        member: String,
    },
    /// A generated file.
    File(VirtualFile),
}

/// Reserved names.
pub mod names {
    /// The synthetic metadata directory.
    pub const META: &str = ".meta";
    /// Policy directory.
    pub const IAM: &str = "iam";
    /// `.meta/bucket.json`
    pub const BUCKET_JSON: &str = "bucket.json";
    /// `.meta/objects`
    pub const OBJECTS: &str = "objects";
    /// Suffix of object descriptor files.
    pub const JSON_SUFFIX: &str = ".json";
    /// `<table>/schema.json`
    pub const SCHEMA_JSON: &str = "schema.json";
    /// `<table>/metadata.json`
    pub const METADATA_JSON: &str = "metadata.json";
    /// `<account>/account.json`
    pub const ACCOUNT_JSON: &str = "account.json";
    /// `<account>/keys.json`
    pub const KEYS_JSON: &str = "keys.json";
    /// `iam/policy.json`
    pub const POLICY_JSON: &str = "policy.json";
    /// `iam/by-role`
    pub const BY_ROLE: &str = "by-role";
    /// `iam/by-member`
    pub const BY_MEMBER: &str = "by-member";

    /// Whether `name` may appear as a listed or looked-up child.
    ///
    /// Dot-files, empty names and anything that is not a single path component are hidden.
    #[must_use]
    pub fn is_visible(name: &str) -> bool {
        !name.is_empty() && !name.starts_with('.') && !name.contains('/') && !name.contains('\0')
    }
}

/// Cache key builders. Every segment after the first two is a resource name.
pub mod keys {
    /// Buckets of a project.
    #[must_use]
    pub fn buckets(project: &str) -> String {
        format!("storage:buckets:{project}")
    }

    /// A bucket descriptor.
    #[must_use]
    pub fn bucket(bucket: &str) -> String {
        format!("storage:bucket:{bucket}")
    }

    /// A shallow listing of `prefix` in `bucket`.
    #[must_use]
    pub fn objects(bucket: &str, prefix: &str) -> String {
        format!("storage:objects:{bucket}:{prefix}")
    }

    /// The attributes of one object.
    #[must_use]
    pub fn object(bucket: &str, name: &str) -> String {
        format!("storage:object:{bucket}:{name}")
    }

    /// A bucket's access policy.
    #[must_use]
    pub fn bucket_policy(bucket: &str) -> String {
        format!("storage:policy:{bucket}")
    }

    /// Datasets of a project.
    #[must_use]
    pub fn datasets(project: &str) -> String {
        format!("bigquery:datasets:{project}")
    }

    /// Tables of a dataset.
    #[must_use]
    pub fn tables(project: &str, dataset: &str) -> String {
        format!("bigquery:tables:{project}:{dataset}")
    }

    /// A table descriptor.
    #[must_use]
    pub fn table(project: &str, dataset: &str, table: &str) -> String {
        format!("bigquery:table:{project}:{dataset}:{table}")
    }

    /// A table's row count.
    #[must_use]
    pub fn table_rows(project: &str, dataset: &str, table: &str) -> String {
        format!("bigquery:rows:{project}:{dataset}:{table}")
    }

    /// A dataset's access policy.
    #[must_use]
    pub fn dataset_policy(project: &str, dataset: &str) -> String {
        format!("bigquery:dataset-policy:{project}:{dataset}")
    }

    /// A table's access policy.
    #[must_use]
    pub fn table_policy(project: &str, dataset: &str, table: &str) -> String {
        format!("bigquery:table-policy:{project}:{dataset}:{table}")
    }

    /// Service accounts of a project.
    #[must_use]
    pub fn accounts(project: &str) -> String {
        format!("iam:accounts:{project}")
    }

    /// A service account descriptor.
    #[must_use]
    pub fn account(project: &str, email: &str) -> String {
        format!("iam:account:{project}:{email}")
    }

    /// The keys of a service account.
    #[must_use]
    pub fn account_keys(project: &str, email: &str) -> String {
        format!("iam:keys:{project}:{email}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hidden_names() {
        assert!(names::is_visible("file.txt"));
        assert!(!names::is_visible(".hidden"));
        assert!(!names::is_visible(names::META));
        assert!(!names::is_visible(""));
        assert!(!names::is_visible("a/b"));
    }

    #[test]
    fn policy_keys_do_not_share_prefixes_across_kinds() {
        let dataset = PolicyScope::Dataset {
            project: "p".to_owned(),
            dataset: "d".to_owned(),
        }
        .cache_key();
        let table = PolicyScope::Table {
            project: "p".to_owned(),
            dataset: "d".to_owned(),
            table: "t".to_owned(),
        }
        .cache_key();
        assert!(!table.starts_with(&dataset));
    }
}
