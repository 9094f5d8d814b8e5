//! Intrusive, non-allocating doubly-linked circular lists.
//!
//! Grounded on the teacher's `utils/intrusive_list.rs` (`ListHead<Index>`,
//! `Link<Index>`, `Ident<&'static T>`), specialized away from that file's
//! generic `Index: ops::Index`-container indirection. Every object this
//! kernel links into a list (`Tcb`, `MutexCb`, `TimerCb`, ...) is allocated
//! once, lives for the program's lifetime, and is referenced with
//! `&'static Self` (spec §3/§9 — no reference counting, no heap). That
//! collapses the teacher's generic container-indexed design to direct
//! `&'static` pointers, which is exactly the `Ident<&'static T>`
//! specialization the teacher itself provides as `StaticListHead`/
//! `StaticLink`, just made the only representation instead of one of many.
//!
//! All mutation happens while the caller holds the kernel lock
//! ([`crate::klock`]), so plain [`core::cell::Cell`] interior mutability is
//! sufficient; there is never genuine concurrent access to a list's links.
use core::cell::Cell;
use core::fmt;
use core::marker::PhantomData;

/// Per-node link storage for the `Role` list. Embed one of these for each
/// list a node type can simultaneously belong to.
pub struct Links<T: 'static, Role = ()> {
    prev: Cell<Option<&'static T>>,
    next: Cell<Option<&'static T>>,
    linked: Cell<bool>,
    _role: PhantomData<Role>,
}

impl<T, Role> Links<T, Role> {
    pub const fn new() -> Self {
        Self {
            prev: Cell::new(None),
            next: Cell::new(None),
            linked: Cell::new(false),
            _role: PhantomData,
        }
    }

    /// Whether this node currently belongs to this role's list.
    pub fn is_linked(&self) -> bool {
        self.linked.get()
    }
}

impl<T, Role> Default for Links<T, Role> {
    fn default() -> Self {
        Self::new()
    }
}

// Safety: every mutation of a node's links happens while the caller holds
// the kernel lock (see module doc); there is never genuine concurrent
// access. Needed so node types (`Tcb`, `MutexCb`, `TimerCb`, ...) that embed
// `Links` can themselves live in a `static`.
unsafe impl<T: 'static, Role> Sync for Links<T, Role> {}

impl<T, Role> fmt::Debug for Links<T, Role> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Links")
            .field("linked", &self.linked.get())
            .finish()
    }
}

/// Implemented by types that can be linked into a [`List`]. Analogous to
/// the teacher's pointer-to-member accessor closures, but a plain method.
///
/// A node type that belongs to more than one list at once (e.g. a `Tcb`
/// belongs to a ready-queue list, a wait-queue list, and a timeout list)
/// implements `Node<Role>` once per zero-sized `Role` marker type, each
/// pointing at a distinct embedded `Links<Self, Role>` field — coherence
/// allows this because the impls differ in `Role`, even though `Self` is
/// the same type each time.
pub trait Node<Role = ()>: Sized + 'static {
    fn links(&self) -> &Links<Self, Role>;
}

/// An intrusive circular doubly-linked list of `&'static T`, for the `Role`
/// link set.
pub struct List<T: Node<Role>, Role = ()> {
    head: Cell<Option<&'static T>>,
    _role: PhantomData<Role>,
}

impl<T: Node<Role>, Role> List<T, Role> {
    pub const fn new() -> Self {
        Self { head: Cell::new(None), _role: PhantomData }
    }

    pub fn is_empty(&self) -> bool {
        self.head.get().is_none()
    }

    pub fn front(&self) -> Option<&'static T> {
        self.head.get()
    }

    pub fn back(&self) -> Option<&'static T> {
        self.head.get().map(|h| h.links().prev.get().unwrap())
    }

    /// Insert `node` immediately before `before` (a current list member),
    /// or at the back if `before` is `None`.
    fn insert_before(&self, node: &'static T, before: Option<&'static T>) {
        debug_assert!(!node.links().is_linked());
        match (self.head.get(), before) {
            (None, _) => {
                node.links().prev.set(Some(node));
                node.links().next.set(Some(node));
                self.head.set(Some(node));
            }
            (Some(head), before) => {
                let before = before.unwrap_or(head);
                let prev = before.links().prev.get().unwrap();
                prev.links().next.set(Some(node));
                node.links().prev.set(Some(prev));
                node.links().next.set(Some(before));
                before.links().prev.set(Some(node));
            }
        }
        node.links().linked.set(true);
    }

    pub fn push_back(&self, node: &'static T) {
        self.insert_before(node, None);
    }

    pub fn push_front(&self, node: &'static T) {
        let old_head = self.head.get();
        self.insert_before(node, old_head);
        self.head.set(Some(node));
    }

    /// Remove `node` from the list. `node` must currently be linked into
    /// `self`; violating this is a logic error, matching the teacher's
    /// "caller guarantees membership" contract for intrusive lists.
    pub fn remove(&self, node: &'static T) {
        debug_assert!(node.links().is_linked());
        let prev = node.links().prev.get().unwrap();
        let next = node.links().next.get().unwrap();
        if core::ptr::eq(prev, node) {
            // sole element
            self.head.set(None);
        } else {
            prev.links().next.set(Some(next));
            next.links().prev.set(Some(prev));
            if let Some(head) = self.head.get() {
                if core::ptr::eq(head, node) {
                    self.head.set(Some(next));
                }
            }
        }
        node.links().prev.set(None);
        node.links().next.set(None);
        node.links().linked.set(false);
    }

    pub fn pop_front(&self) -> Option<&'static T> {
        let node = self.head.get()?;
        self.remove(node);
        Some(node)
    }

    /// Insert `node` into a list ordered by `less` (ascending: the first
    /// element for which `less(node, existing)` holds wins the spot before
    /// `existing`). Ties go after all existing equal elements, giving FIFO
    /// order among ties — this is how ready queues and wait queues satisfy
    /// spec §3's "sorted-queue" invariant with a FIFO tiebreak.
    pub fn insert_sorted_by(&self, node: &'static T, mut less: impl FnMut(&T, &T) -> bool) {
        if let Some(head) = self.head.get() {
            let mut cursor = head;
            loop {
                if less(node, cursor) {
                    self.insert_before(node, Some(cursor));
                    if core::ptr::eq(cursor, head) {
                        self.head.set(Some(node));
                    }
                    return;
                }
                let next = cursor.links().next.get().unwrap();
                if core::ptr::eq(next, head) {
                    // reached the end without finding a spot: append
                    self.insert_before(node, None);
                    return;
                }
                cursor = next;
            }
        } else {
            self.push_back(node);
        }
    }

    pub fn iter(&self) -> Iter<T, Role> {
        Iter { head: self.head.get(), cur: self.head.get(), _role: PhantomData }
    }
}

impl<T: Node<Role>, Role> Default for List<T, Role> {
    fn default() -> Self {
        Self::new()
    }
}

// Safety: see `Links`'s impl above — all mutation happens under the kernel
// lock. Needed for `List`/`DeadlineList` statics declared directly (not
// behind a `CpuLockCell`), e.g. `task::TIMEOUTS`/`timer::TIMERS`.
unsafe impl<T: Node<Role>, Role> Sync for List<T, Role> {}

/// Walks the list starting at its head, stopping once it wraps back around.
pub struct Iter<T: Node<Role>, Role = ()> {
    head: Option<&'static T>,
    cur: Option<&'static T>,
    _role: PhantomData<Role>,
}

impl<T: Node<Role>, Role> Iterator for Iter<T, Role> {
    type Item = &'static T;

    fn next(&mut self) -> Option<Self::Item> {
        let cur = self.cur?;
        let next = cur.links().next.get().unwrap();
        self.cur = if core::ptr::eq(next, self.head?) { None } else { Some(next) };
        Some(cur)
    }
}
