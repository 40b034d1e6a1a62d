//! Pagination types.

/// A response page of a `pageToken`-paginated listing.
pub trait Paginated {
    /// The individual item type within a page.
    type Item;

    /// Returns the items from this page.
    fn items(self) -> Vec<Self::Item>;

    /// Returns the token of the next page, if any.
    fn next_page_token(&self) -> Option<&str>;
}
