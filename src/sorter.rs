//! External sorter for filter hits.
//!
//! A filter pass over a large query can emit far more hits than fit
//! in memory. The sorter buffers records up to a chunk size, spills
//! sorted runs of fixed-width little-endian records to temp files
//! (one u64 record-count prefix per run), and on drain merges the
//! runs k-way with the in-memory tail. The merged stream is ordered
//! by (diagonal, q_from, q_to), which is exactly the order the
//! merger requires.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tempfile::TempDir;

use crate::error::PalsError;
use crate::filter::FilterHit;

/// Records held in memory before a run is spilled. 16 bytes each.
const DEFAULT_CHUNK: usize = 1 << 20;

pub struct HitSorter {
    chunk: usize,
    buf: Vec<FilterHit>,
    runs: Vec<PathBuf>,
    dir: Option<TempDir>,
    len: u64,
}

impl HitSorter {
    pub fn new() -> HitSorter {
        HitSorter::with_chunk_size(DEFAULT_CHUNK)
    }

    pub fn with_chunk_size(chunk: usize) -> HitSorter {
        HitSorter {
            chunk: chunk.max(1),
            buf: Vec::new(),
            runs: Vec::new(),
            dir: None,
            len: 0,
        }
    }

    /// Number of hits pushed since the last clear.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn push(&mut self, hit: FilterHit) -> Result<(), PalsError> {
        self.buf.push(hit);
        self.len += 1;
        if self.buf.len() >= self.chunk {
            self.spill()?;
        }
        Ok(())
    }

    fn spill(&mut self) -> Result<(), PalsError> {
        if self.buf.is_empty() {
            return Ok(());
        }
        if self.dir.is_none() {
            self.dir = Some(TempDir::with_prefix("pals-sort-")?);
        }
        let dir = self.dir.as_ref().unwrap();
        let path = dir.path().join(format!("run-{:04}", self.runs.len()));

        self.buf.sort_unstable_by_key(|h| h.sort_key());
        let mut w = BufWriter::new(File::create(&path)?);
        w.write_u64::<LittleEndian>(self.buf.len() as u64)?;
        for h in &self.buf {
            w.write_i64::<LittleEndian>(h.diagonal)?;
            w.write_i32::<LittleEndian>(h.q_from as i32)?;
            w.write_i32::<LittleEndian>(h.q_to as i32)?;
        }
        w.flush()?;

        self.runs.push(path);
        self.buf.clear();
        Ok(())
    }

    /// Sort whatever is buffered and expose the whole collection as a
    /// single merged stream. The sorter stays usable for another pass
    /// after `clear`.
    pub fn drain(&mut self) -> Result<HitStream, PalsError> {
        self.buf.sort_unstable_by_key(|h| h.sort_key());
        let mut sources = Vec::with_capacity(self.runs.len() + 1);
        for path in &self.runs {
            let mut r = BufReader::new(File::open(path)?);
            let remaining = r.read_u64::<LittleEndian>()?;
            sources.push(HitSource::Run { r, remaining });
        }
        if !self.buf.is_empty() {
            sources.push(HitSource::Mem {
                hits: std::mem::take(&mut self.buf),
                next: 0,
            });
        }
        HitStream::start(sources)
    }

    /// Remove spilled runs and reset counters. Called between passes
    /// and on error paths.
    pub fn clear(&mut self) -> Result<(), PalsError> {
        for path in self.runs.drain(..) {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.buf.clear();
        self.len = 0;
        Ok(())
    }
}

impl Default for HitSorter {
    fn default() -> Self {
        HitSorter::new()
    }
}

enum HitSource {
    Run { r: BufReader<File>, remaining: u64 },
    Mem { hits: Vec<FilterHit>, next: usize },
}

impl HitSource {
    fn next_hit(&mut self) -> Result<Option<FilterHit>, PalsError> {
        match self {
            HitSource::Run { r, remaining } => {
                if *remaining == 0 {
                    return Ok(None);
                }
                *remaining -= 1;
                let diagonal = r.read_i64::<LittleEndian>()?;
                let q_from = r.read_i32::<LittleEndian>()? as usize;
                let q_to = r.read_i32::<LittleEndian>()? as usize;
                Ok(Some(FilterHit {
                    q_from,
                    q_to,
                    diagonal,
                }))
            }
            HitSource::Mem { hits, next } => {
                if *next >= hits.len() {
                    return Ok(None);
                }
                let h = hits[*next];
                *next += 1;
                Ok(Some(h))
            }
        }
    }
}

/// K-way merge over sorted runs. The source index takes part in the
/// heap key so ties drain in a fixed order and the stream stays
/// deterministic.
pub struct HitStream {
    heap: BinaryHeap<Reverse<((i64, usize, usize), usize)>>,
    pending: Vec<Option<FilterHit>>,
    sources: Vec<HitSource>,
}

impl HitStream {
    fn start(mut sources: Vec<HitSource>) -> Result<HitStream, PalsError> {
        let mut heap = BinaryHeap::with_capacity(sources.len());
        let mut pending = vec![None; sources.len()];
        for (i, src) in sources.iter_mut().enumerate() {
            if let Some(h) = src.next_hit()? {
                heap.push(Reverse((h.sort_key(), i)));
                pending[i] = Some(h);
            }
        }
        Ok(HitStream {
            heap,
            pending,
            sources,
        })
    }
}

impl Iterator for HitStream {
    type Item = Result<FilterHit, PalsError>;

    fn next(&mut self) -> Option<Self::Item> {
        let Reverse((_, i)) = self.heap.pop()?;
        let hit = self.pending[i].take().expect("heap entry without a pending hit");
        match self.sources[i].next_hit() {
            Ok(Some(h)) => {
                self.heap.push(Reverse((h.sort_key(), i)));
                self.pending[i] = Some(h);
            }
            Ok(None) => {}
            Err(e) => return Some(Err(e)),
        }
        Some(Ok(hit))
    }
}
