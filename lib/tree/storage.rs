//! Buckets, prefixes and objects.

use std::sync::Arc;

use bytes::Bytes;

use super::node::{keys, names};
use super::{Attrs, Entry, Fetcher, Listing, NodeId, TreeInner, VirtualFile, enoent};
use crate::backend::{Bucket, CloudBackend, ObjectAttributes, ObjectListing};
use crate::cache::metadata::{CacheError, ttl};

/// Object names are split into directories on this character.
const DELIMITER: &str = "/";

impl<B: CloudBackend> Fetcher<B> {
    /// One level of `prefix`. Object attributes found in the listing are seeded into the cache,
    /// so stat-ing the listed files costs no further calls.
    async fn objects(self, bucket: String, prefix: String) -> Result<ObjectListing, CacheError> {
        let seed = Arc::clone(&self.cache);
        let key = keys::objects(&bucket, &prefix);
        self.json(key, ttl::SHORT, move |backend| async move {
            let listing = backend.list_objects(&bucket, &prefix, DELIMITER).await?;
            for object in &listing.objects {
                seed.put_json(&keys::object(&bucket, &object.name), ttl::SHORT, object)
                    .await;
            }
            Ok(listing)
        })
        .await
    }

    /// Buckets of `project`. Each listed bucket is seeded as its own descriptor, so the bucket
    /// directory can report its creation time without a call of its own.
    async fn buckets(self, project: String) -> Result<Vec<Bucket>, CacheError> {
        let seed = Arc::clone(&self.cache);
        let key = keys::buckets(&project);
        self.json(key, ttl::SHORT, move |backend| async move {
            let buckets = backend.list_buckets(&project).await?;
            for bucket in &buckets {
                seed.put_json(&keys::bucket(&bucket.name), ttl::LONG, bucket)
                    .await;
            }
            Ok(buckets)
        })
        .await
    }

    async fn object_attributes(
        self,
        bucket: String,
        name: String,
    ) -> Result<ObjectAttributes, CacheError> {
        let key = keys::object(&bucket, &name);
        self.json(key, ttl::SHORT, move |backend| async move {
            backend.get_object_attributes(&bucket, &name).await
        })
        .await
    }
}

/// The part of `full` below `prefix`, without a trailing delimiter.
fn relative<'a>(full: &'a str, prefix: &str) -> &'a str {
    full.strip_prefix(prefix)
        .unwrap_or(full)
        .trim_end_matches(DELIMITER)
}

impl<B: CloudBackend> TreeInner<B> {
    pub(super) async fn list_buckets(&self, project: &str) -> Result<Listing, std::io::Error> {
        let buckets = self.fetch.clone().buckets(project.to_owned()).await?;

        Ok(buckets
            .into_iter()
            .filter(|b| names::is_visible(&b.name))
            .map(|b| {
                let attrs = Attrs::dir().modified(b.time_created).created(b.time_created);
                let node = NodeId::ObjectDir {
                    bucket: b.name.clone(),
                    prefix: String::new(),
                };
                (b.name, Entry { node, attrs })
            })
            .collect())
    }

    pub(super) async fn list_object_dir(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Listing, std::io::Error> {
        let listing = self
            .fetch
            .clone()
            .objects(bucket.to_owned(), prefix.to_owned())
            .await?;

        let mut out = Listing::new();
        for sub in listing.prefixes {
            let name = relative(&sub, prefix);
            if names::is_visible(name) {
                out.insert(
                    name.to_owned(),
                    Entry::dir(NodeId::ObjectDir {
                        bucket: bucket.to_owned(),
                        prefix: sub.clone(),
                    }),
                );
            }
        }
        // An object and a prefix sharing a name resolve to the object, as lookup does.
        for object in listing.objects {
            let name = relative(&object.name, prefix);
            if names::is_visible(name) && !object.name.ends_with(DELIMITER) {
                let attrs = Attrs::file(object.size)
                    .modified(object.updated)
                    .created(object.time_created);
                out.insert(
                    name.to_owned(),
                    Entry {
                        node: NodeId::Object {
                            bucket: bucket.to_owned(),
                            name: object.name.clone(),
                        },
                        attrs,
                    },
                );
            }
        }
        out.insert(
            names::META.to_owned(),
            Entry::dir(NodeId::StorageMeta {
                bucket: bucket.to_owned(),
                prefix: prefix.to_owned(),
            }),
        );
        Ok(out)
    }

    pub(super) async fn list_object_descriptors(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Listing, std::io::Error> {
        let listing = self
            .fetch
            .clone()
            .objects(bucket.to_owned(), prefix.to_owned())
            .await?;

        Ok(listing
            .objects
            .into_iter()
            .filter(|o| !o.name.ends_with(DELIMITER) && names::is_visible(relative(&o.name, prefix)))
            .map(|o| {
                let file_name = format!("{}{}", relative(&o.name, prefix), names::JSON_SUFFIX);
                let node = NodeId::File(VirtualFile::ObjectDescriptor {
                    bucket: bucket.to_owned(),
                    object: o.name,
                });
                (file_name, Entry::file(node))
            })
            .collect())
    }

    /// Resolve `name` inside a bucket directory.
    ///
    /// An object named `prefix + name` wins; failing that, a non-empty `prefix + name + "/"`
    /// is a directory; anything else does not exist.
    pub(super) async fn lookup_in_object_dir(
        &self,
        bucket: &str,
        prefix: &str,
        name: &str,
    ) -> Result<NodeId, std::io::Error> {
        let object = format!("{prefix}{name}");
        match self
            .fetch
            .clone()
            .object_attributes(bucket.to_owned(), object.clone())
            .await
        {
            Ok(_) => {
                return Ok(NodeId::Object {
                    bucket: bucket.to_owned(),
                    name: object,
                });
            }
            Err(CacheError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        let sub = format!("{object}{DELIMITER}");
        let children = self
            .fetch
            .clone()
            .objects(bucket.to_owned(), sub.clone())
            .await?;
        if children.is_empty() {
            return Err(enoent());
        }
        Ok(NodeId::ObjectDir {
            bucket: bucket.to_owned(),
            prefix: sub,
        })
    }

    pub(super) async fn lookup_object_descriptor(
        &self,
        bucket: &str,
        prefix: &str,
        name: &str,
    ) -> Result<NodeId, std::io::Error> {
        let stem = name
            .strip_suffix(names::JSON_SUFFIX)
            .filter(|s| names::is_visible(s))
            .ok_or_else(enoent)?;
        let object = format!("{prefix}{stem}");
        self.fetch
            .clone()
            .object_attributes(bucket.to_owned(), object.clone())
            .await?;
        Ok(NodeId::File(VirtualFile::ObjectDescriptor {
            bucket: bucket.to_owned(),
            object,
        }))
    }

    pub(super) async fn object_stat(
        &self,
        bucket: &str,
        name: &str,
    ) -> Result<Attrs, std::io::Error> {
        let object = self
            .fetch
            .clone()
            .object_attributes(bucket.to_owned(), name.to_owned())
            .await?;
        Ok(Attrs::file(object.size)
            .modified(object.updated)
            .created(object.time_created))
    }

    /// Attributes of a bucket's root directory.
    ///
    /// Only consults descriptors already in the cache: resolving a bucket name never reaches the
    /// backend, and a bucket not yet seen in a listing reports the mount time.
    pub(super) async fn bucket_stat(&self, bucket: &str) -> Attrs {
        match self.fetch.cache.peek_json::<Bucket>(&keys::bucket(bucket)).await {
            Some(b) => Attrs::dir().modified(b.time_created).created(b.time_created),
            None => Attrs::dir(),
        }
    }

    pub(super) async fn bucket_descriptor(&self, bucket: &str) -> Result<Bytes, std::io::Error> {
        let owned = bucket.to_owned();
        Ok(self
            .fetch
            .clone()
            .raw(keys::bucket(bucket), ttl::LONG, move |backend| async move {
                backend.get_bucket(&owned).await
            })
            .await?)
    }

    pub(super) async fn object_descriptor(
        &self,
        bucket: &str,
        object: &str,
    ) -> Result<Bytes, std::io::Error> {
        let (b, o) = (bucket.to_owned(), object.to_owned());
        Ok(self
            .fetch
            .clone()
            .raw(keys::object(bucket, object), ttl::SHORT, move |backend| async move {
                backend.get_object_attributes(&b, &o).await
            })
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_names() {
        assert_eq!(relative("logs/2024/", "logs/"), "2024");
        assert_eq!(relative("logs/a.txt", "logs/"), "a.txt");
        assert_eq!(relative("top.txt", ""), "top.txt");
        assert_eq!(relative("logs/", "logs/"), "");
    }
}
