//! Supplemental page table: the pages one address space knows about, keyed
//! by their page-aligned virtual address.

use crate::error::{Result, VmError};
use crate::page::{Page, PageTarget, PageLoader};
use crate::page::uninit::UninitPage;
use alloc::{collections::BTreeMap, sync::Arc, vec::Vec};
use kidneyos_shared::mem::{is_page_aligned, page_round_down, PAGE_FRAME_SIZE};

#[derive(Debug, Default)]
pub struct SupplementalPageTable(BTreeMap<usize, Page>);

impl SupplementalPageTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Add a pending page at `va`, taking ownership of `loader`.
    pub fn create_pending(
        &mut self,
        va: usize,
        writable: bool,
        target: PageTarget,
        loader: Option<Arc<dyn PageLoader>>,
    ) -> Result<()> {
        debug_assert!(is_page_aligned(va));
        self.insert(Page::new_pending(va, writable, UninitPage::new(target, loader)))
    }

    /// The page containing `va`.
    pub fn lookup(&self, va: usize) -> Option<&Page> {
        self.0.get(&page_round_down(va))
    }

    pub fn lookup_mut(&mut self, va: usize) -> Option<&mut Page> {
        self.0.get_mut(&page_round_down(va))
    }

    pub fn contains(&self, va: usize) -> bool {
        self.0.contains_key(&page_round_down(va))
    }

    pub fn insert(&mut self, page: Page) -> Result<()> {
        let va = page.va();
        if self.0.contains_key(&va) {
            return Err(VmError::AlreadyMapped(va));
        }
        self.0.insert(va, page);
        Ok(())
    }

    /// Take the page at `va` out of the table. Its resources are not
    /// released; the caller destroys it.
    pub fn remove(&mut self, va: usize) -> Option<Page> {
        self.0.remove(&page_round_down(va))
    }

    /// The lowest existing page among the `pages` pages starting at `start`.
    pub fn first_in_range(&self, start: usize, pages: usize) -> Option<usize> {
        let end = start.saturating_add(pages.saturating_mul(PAGE_FRAME_SIZE));
        self.0.range(start..end).next().map(|(&va, _)| va)
    }

    pub fn is_range_free(&self, start: usize, pages: usize) -> bool {
        self.first_in_range(start, pages).is_none()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Page> {
        self.0.values()
    }

    pub fn addresses(&self) -> Vec<usize> {
        self.0.keys().copied().collect()
    }

    /// Empty the table, handing every page to the caller for destruction. The
    /// table stays usable.
    pub fn drain(&mut self) -> Vec<Page> {
        core::mem::take(&mut self.0).into_values().collect()
    }
}
