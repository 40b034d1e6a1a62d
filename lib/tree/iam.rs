//! Service accounts and the access-policy subtrees.

use bytes::Bytes;
use tracing::{debug, trace};

use super::node::{PolicyScope, keys, names};
use super::policy::{self, encode_component, encode_role};
use super::{Entry, Fetcher, Listing, NodeId, TreeInner, VirtualFile};
use crate::backend::{BackendError, CloudBackend, Policy, ServiceAccount, ServiceAccountKey};
use crate::cache::metadata::{CacheError, ttl};

impl<B: CloudBackend> Fetcher<B> {
    /// The descriptor of one service account, as served by `account.json`.
    pub(super) async fn account(self, project: String, email: String) -> Result<Bytes, CacheError> {
        let key = keys::account(&project, &email);
        self.raw(key, ttl::LONG, move |backend| async move {
            backend.get_service_account(&project, &email).await
        })
        .await
    }

    async fn policy(self, scope: PolicyScope) -> Result<Policy, CacheError> {
        self.json(scope.cache_key(), ttl::SHORT, move |backend| async move {
            fetch_policy(backend.as_ref(), &scope).await
        })
        .await
    }
}

async fn fetch_policy<B: CloudBackend>(
    backend: &B,
    scope: &PolicyScope,
) -> Result<Policy, BackendError> {
    match scope {
        PolicyScope::Bucket { bucket } => backend.fetch_bucket_policy(bucket).await,
        PolicyScope::Dataset { project, dataset } => {
            backend.fetch_dataset_policy(project, dataset).await
        }
        PolicyScope::Table {
            project,
            dataset,
            table,
        } => backend.fetch_table_policy(project, dataset, table).await,
    }
}

impl<B: CloudBackend> TreeInner<B> {
    /// List the service accounts of a project, warming every account descriptor.
    pub(super) async fn list_accounts(&self, project: &str) -> Result<Listing, std::io::Error> {
        let owned = project.to_owned();
        let accounts: Vec<ServiceAccount> = self
            .fetch
            .clone()
            .json(keys::accounts(project), ttl::SHORT, move |backend| async move {
                backend.list_service_accounts(&owned).await
            })
            .await?;

        let emails: Vec<String> = accounts
            .into_iter()
            .map(|a| a.email)
            .filter(|e| names::is_visible(e))
            .collect();

        let warmed = self
            .lister
            .fetch_all(emails.clone(), |email| {
                self.fetch.clone().account(project.to_owned(), email)
            })
            .await;
        if !warmed.is_complete() {
            debug!(
                project,
                failed = warmed.failed.len(),
                "account descriptor prefetch incomplete"
            );
            for (email, failure) in &warmed.failed {
                trace!(project, email = %email, ?failure, "account descriptor prefetch failed");
            }
        }

        Ok(emails
            .into_iter()
            .map(|email| {
                let node = NodeId::ServiceAccount {
                    project: project.to_owned(),
                    email: email.clone(),
                };
                (email, Entry::dir(node))
            })
            .collect())
    }

    pub(super) async fn account_keys(
        &self,
        project: &str,
        email: &str,
    ) -> Result<Bytes, std::io::Error> {
        let (p, e) = (project.to_owned(), email.to_owned());
        Ok(self
            .fetch
            .clone()
            .raw(
                keys::account_keys(project, email),
                ttl::SHORT,
                move |backend| async move {
                    let keys: Vec<ServiceAccountKey> =
                        backend.list_service_account_keys(&p, &e).await?;
                    Ok(keys)
                },
            )
            .await?)
    }

    pub(super) async fn policy_document(&self, scope: &PolicyScope) -> Result<Bytes, std::io::Error> {
        let scope = scope.clone();
        let key = scope.cache_key();
        Ok(self
            .fetch
            .clone()
            .raw(key, ttl::SHORT, move |backend| async move {
                fetch_policy(backend.as_ref(), &scope).await
            })
            .await?)
    }

    /// Children of the `by-role` and `by-member` views, all derived from one cached policy.
    pub(super) async fn list_policy_view(&self, node: &NodeId) -> Result<Listing, std::io::Error> {
        let scope = match node {
            NodeId::PolicyByRole(scope)
            | NodeId::PolicyByMember(scope)
            | NodeId::PolicyRole { scope, .. }
            | NodeId::PolicyMember { scope, .. } => scope,
            _ => return Err(std::io::Error::from_raw_os_error(libc::ENOTDIR)),
        };
        let fetched = self.fetch.clone().policy(scope.clone()).await?;

        let mut out = Listing::new();
        match node {
            NodeId::PolicyByRole(_) => {
                for role in policy::by_role(&fetched).into_keys() {
                    out.insert(
                        encode_role(&role),
                        Entry::dir(NodeId::PolicyRole {
                            scope: scope.clone(),
                            role,
                        }),
                    );
                }
            }
            NodeId::PolicyByMember(_) => {
                for member in policy::by_member(&fetched).into_keys() {
                    out.insert(
                        encode_component(&member),
                        Entry::dir(NodeId::PolicyMember {
                            scope: scope.clone(),
                            member,
                        }),
                    );
                }
            }
            NodeId::PolicyRole { role, .. } => {
                let members = policy::by_role(&fetched).remove(role).unwrap_or_default();
                for member in members {
                    out.insert(
                        encode_component(&member),
                        Entry::file(NodeId::File(VirtualFile::RoleMember {
                            scope: scope.clone(),
                            role: role.clone(),
                            member,
                        })),
                    );
                }
            }
            NodeId::PolicyMember { member, .. } => {
                let roles = policy::by_member(&fetched)
                    .remove(member)
                    .unwrap_or_default();
                for role in roles {
                    out.insert(
                        encode_role(&role),
                        Entry::file(NodeId::File(VirtualFile::MemberRole {
                            scope: scope.clone(),
                            member: member.clone(),
                            role,
                        })),
                    );
                }
            }
            _ => {}
        }
        Ok(out)
    }
}
