//! Output pagination.

/// Output window: skip `offset` records, then emit at most `size` records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: usize,
    pub size: usize,
}

impl Page {
    pub fn new(offset: usize, size: usize) -> Self {
        Page { offset, size }
    }

    /// First `size` records.
    pub fn first(size: usize) -> Self {
        Page { offset: 0, size }
    }
}

/// What to do with the next sorted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Record is before the window.
    Skip,
    /// Record is inside the window.
    Emit,
    /// Window is already full.
    Stop,
}

/// Tracks the position of the sorted output relative to a [`Page`].
#[derive(Debug)]
pub struct Paginator {
    page: Option<Page>,
    cursor: usize,
    emitted: usize,
}

impl Paginator {
    /// Creates a paginator. `None` disables pagination.
    pub fn new(page: Option<Page>) -> Self {
        Paginator {
            page,
            cursor: 0,
            emitted: 0,
        }
    }

    /// Accounts for the next record and decides whether it is emitted.
    pub fn admit(&mut self) -> Admission {
        let page = match self.page {
            Some(page) => page,
            None => {
                self.emitted += 1;
                return Admission::Emit;
            }
        };

        if self.cursor < page.offset {
            self.cursor += 1;
            return Admission::Skip;
        }
        if self.emitted >= page.size {
            return Admission::Stop;
        }
        self.emitted += 1;

        return Admission::Emit;
    }

    /// Checks whether no further record can be emitted.
    pub fn is_exhausted(&self) -> bool {
        self.page.map_or(false, |page| self.emitted >= page.size)
    }

    /// Number of records admitted so far.
    pub fn emitted(&self) -> usize {
        self.emitted
    }
}
