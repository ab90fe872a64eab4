use parking_lot::Mutex;
use std::fmt;
use std::fs::File;
use std::io::{self, Write};
use std::os::fd::{AsFd, OwnedFd};
use std::sync::Arc;
use tracing::trace;

/// Whether a stream is read or written by the command holding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    /// The `<` / `>` marker used in `cliveio#` bindings.
    pub fn marker(self) -> char {
        match self {
            Direction::In => '<',
            Direction::Out => '>',
        }
    }
}

/// Who is responsible for releasing a stream's descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// Held by a single environment.
    Exclusive,
    /// Held by this many environments (always at least two).
    Shared(usize),
    /// Never released by `close`: standard and inherited streams.
    Pinned,
}

struct Slot {
    ownership: Ownership,
    file: Option<Arc<File>>,
}

struct Inner {
    name: String,
    dir: Direction,
    slot: Mutex<Slot>,
}

/// A named descriptor shared between execution environments.
///
/// Cloning the handle does not take a reference; use [`StreamHandle::share`]
/// when another environment starts holding it and [`StreamHandle::close`]
/// when it stops. The descriptor is released when the last holder closes,
/// and a released handle stays released.
#[derive(Clone)]
pub struct StreamHandle {
    inner: Arc<Inner>,
}

impl StreamHandle {
    fn with(name: &str, dir: Direction, file: File, ownership: Ownership) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.to_string(),
                dir,
                slot: Mutex::new(Slot {
                    ownership,
                    file: Some(Arc::new(file)),
                }),
            }),
        }
    }

    /// A handle held by a single environment.
    pub fn owned(name: &str, dir: Direction, file: impl Into<File>) -> Self {
        Self::with(name, dir, file.into(), Ownership::Exclusive)
    }

    /// A handle that `close` never releases.
    pub fn pinned(name: &str, dir: Direction, file: impl Into<File>) -> Self {
        Self::with(name, dir, file.into(), Ownership::Pinned)
    }

    /// A pinned handle on a duplicate of one of the process' own descriptors.
    pub fn pinned_dup(name: &str, dir: Direction, fd: impl AsFd) -> io::Result<Self> {
        let owned: OwnedFd = fd.as_fd().try_clone_to_owned()?;
        Ok(Self::pinned(name, dir, owned))
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn dir(&self) -> Direction {
        self.inner.dir
    }

    pub fn is_input(&self) -> bool {
        self.inner.dir == Direction::In
    }

    pub fn ownership(&self) -> Ownership {
        self.inner.slot.lock().ownership
    }

    /// Number of holders, `None` for pinned handles and `Some(0)` once released.
    pub fn refs(&self) -> Option<usize> {
        let slot = self.inner.slot.lock();
        match (slot.ownership, &slot.file) {
            (Ownership::Pinned, _) => None,
            (_, None) => Some(0),
            (Ownership::Exclusive, Some(_)) => Some(1),
            (Ownership::Shared(n), Some(_)) => Some(n),
        }
    }

    pub fn is_released(&self) -> bool {
        self.inner.slot.lock().file.is_none()
    }

    /// Take one more reference for a new holder.
    pub fn share(&self) -> StreamHandle {
        let mut slot = self.inner.slot.lock();
        if slot.file.is_some() {
            slot.ownership = match slot.ownership {
                Ownership::Exclusive => Ownership::Shared(2),
                Ownership::Shared(n) => Ownership::Shared(n + 1),
                Ownership::Pinned => Ownership::Pinned,
            };
        }
        trace!(stream = %self.inner.name, ownership = ?slot.ownership, "share");
        self.clone()
    }

    /// Drop one reference; the last one releases the descriptor.
    pub fn close(&self) {
        let mut slot = self.inner.slot.lock();
        if slot.file.is_none() {
            return;
        }
        match slot.ownership {
            Ownership::Pinned => {}
            Ownership::Shared(2) => slot.ownership = Ownership::Exclusive,
            Ownership::Shared(n) => slot.ownership = Ownership::Shared(n - 1),
            Ownership::Exclusive => {
                slot.file = None;
                trace!(stream = %self.inner.name, "released");
                return;
            }
        }
        trace!(stream = %self.inner.name, ownership = ?slot.ownership, "close");
    }

    /// The underlying file, kept open for as long as the returned value lives.
    pub fn file(&self) -> io::Result<Arc<File>> {
        self.inner
            .slot
            .lock()
            .file
            .clone()
            .ok_or_else(|| io::Error::other(format!("{}: stream closed", self.inner.name)))
    }

    /// A fresh descriptor for the same open file, for handing to a child process.
    pub fn try_clone_file(&self) -> io::Result<File> {
        self.file()?.try_clone()
    }

    pub fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        let file = self.file()?;
        let mut w: &File = &file;
        w.write_all(buf)
    }
}

impl fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.inner.slot.lock();
        f.debug_struct("StreamHandle")
            .field("name", &self.inner.name)
            .field("dir", &self.inner.dir)
            .field("ownership", &slot.ownership)
            .field("open", &slot.file.is_some())
            .finish()
    }
}

/// A host pipe as an (input, output) pair of exclusively owned handles.
pub fn pipe(name: &str) -> io::Result<(StreamHandle, StreamHandle)> {
    let (r, w) = io::pipe()?;
    let r: OwnedFd = r.into();
    let w: OwnedFd = w.into();
    Ok((
        StreamHandle::owned(name, Direction::In, r),
        StreamHandle::owned(name, Direction::Out, w),
    ))
}
