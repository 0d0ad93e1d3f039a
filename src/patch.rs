//! Binary patch codec
//!
//! Implements the bsdiff-style codec used for `.bsdiff` sidecars: a
//! block-indexed binary diff of one payload file against its base revision.
//! The patch payload is opaque to the rest of the engine; it carries a
//! magic, the expected output size, and a copy/insert op stream. Payload
//! verification happens one layer up, against the `.shasum` identity record
//! the builder writes next to every patch.
//!
//! Legacy `.diff` sidecars (OS-provided msdelta payloads) are recognized but
//! cannot be applied by this toolchain; see [`apply_msdelta`].

use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Result};

/// Patch payload magic, bumped on format changes
const PATCH_MAGIC: &[u8; 8] = b"UPDELTA1";

/// Block granularity for matching against the base payload
const BLOCK_SIZE: usize = 4096;

/// Op markers in the serialized stream
const OP_COPY: u8 = 0x01;
const OP_INSERT: u8 = 0x02;

/// One instruction in the old -> new transformation
#[derive(Debug, Clone, PartialEq, Eq)]
enum PatchOp {
    /// Copy `length` bytes from the old payload at `offset`
    Copy { offset: u64, length: u64 },
    /// Insert literal bytes
    Insert(Vec<u8>),
}

/// Create a patch transforming `old` into `new`
///
/// Deterministic for a given input pair.
pub fn create_patch(old: &[u8], new: &[u8]) -> Result<Vec<u8>> {
    let ops = diff_blocks(old, new);
    Ok(encode(&ops, new))
}

/// Apply a patch produced by [`create_patch`]
///
/// Validates the payload structure, every copy range, and the declared
/// output size before returning the reconstructed bytes.
pub fn apply_patch(old: &[u8], patch: &[u8]) -> Result<Vec<u8>> {
    let (ops, output_size) = decode(patch)?;

    let mut output = Vec::with_capacity(output_size as usize);
    for op in &ops {
        match op {
            PatchOp::Copy { offset, length } => {
                let start = *offset as usize;
                let end = start
                    .checked_add(*length as usize)
                    .filter(|end| *end <= old.len())
                    .ok_or_else(|| {
                        anyhow::anyhow!(
                            "copy range {}+{} exceeds base payload of {} bytes",
                            offset,
                            length,
                            old.len()
                        )
                    })?;
                output.extend_from_slice(&old[start..end]);
            }
            PatchOp::Insert(data) => output.extend_from_slice(data),
        }
    }

    if output.len() as u64 != output_size {
        bail!(
            "patched output is {} bytes, patch declares {}",
            output.len(),
            output_size
        );
    }

    Ok(output)
}

/// Apply an OS msdelta patch
///
/// Delta archives from older toolchains may carry `.diff` sidecars produced
/// by the platform msdelta routine. This build has no such routine, so
/// non-empty msdelta payloads are refused with a clear error; zero-length
/// markers never reach this point (they mean "unchanged" and are skipped by
/// the applier).
pub fn apply_msdelta(patch_file: &Path, _old_file: &Path, _out_file: &Path) -> Result<()> {
    bail!(
        "msdelta payload {} cannot be applied: OS delta support is unavailable in this build",
        patch_file.display()
    )
}

/// Compute the op stream transforming `old` into `new`
///
/// Greedy block matcher: index every BLOCK_SIZE-aligned old block by FNV
/// hash, scan the new payload for block matches, extend each match forward
/// byte-wise, and emit literal inserts for everything in between.
fn diff_blocks(old: &[u8], new: &[u8]) -> Vec<PatchOp> {
    let mut index: HashMap<u64, Vec<usize>> = HashMap::new();
    for (block, chunk) in old.chunks(BLOCK_SIZE).enumerate() {
        index.entry(fnv1a(chunk)).or_default().push(block * BLOCK_SIZE);
    }

    let mut ops: Vec<PatchOp> = Vec::new();
    let mut literal: Vec<u8> = Vec::new();
    let mut pos = 0;

    while pos < new.len() {
        let window = BLOCK_SIZE.min(new.len() - pos);
        let candidate = &new[pos..pos + window];

        let matched = index
            .get(&fnv1a(candidate))
            .into_iter()
            .flatten()
            .copied()
            .find(|&old_pos| old.get(old_pos..old_pos + window) == Some(candidate));

        match matched {
            Some(old_pos) => {
                if !literal.is_empty() {
                    ops.push(PatchOp::Insert(std::mem::take(&mut literal)));
                }

                let mut length = window;
                while pos + length < new.len()
                    && old_pos + length < old.len()
                    && new[pos + length] == old[old_pos + length]
                {
                    length += 1;
                }

                push_copy(&mut ops, old_pos as u64, length as u64);
                pos += length;
            }
            None => {
                literal.push(new[pos]);
                pos += 1;
            }
        }
    }

    if !literal.is_empty() {
        ops.push(PatchOp::Insert(literal));
    }

    ops
}

/// Append a copy op, merging with a contiguous predecessor
fn push_copy(ops: &mut Vec<PatchOp>, offset: u64, length: u64) {
    if let Some(PatchOp::Copy {
        offset: prev_offset,
        length: prev_length,
    }) = ops.last_mut()
    {
        if *prev_offset + *prev_length == offset {
            *prev_length += length;
            return;
        }
    }
    ops.push(PatchOp::Copy { offset, length });
}

/// FNV-1a over a block
fn fnv1a(data: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &byte in data {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

fn encode(ops: &[PatchOp], new: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(PATCH_MAGIC);
    out.extend_from_slice(&(new.len() as u64).to_le_bytes());
    out.extend_from_slice(&(ops.len() as u32).to_le_bytes());

    for op in ops {
        match op {
            PatchOp::Copy { offset, length } => {
                out.push(OP_COPY);
                out.extend_from_slice(&offset.to_le_bytes());
                out.extend_from_slice(&length.to_le_bytes());
            }
            PatchOp::Insert(data) => {
                out.push(OP_INSERT);
                out.extend_from_slice(&(data.len() as u64).to_le_bytes());
                out.extend_from_slice(data);
            }
        }
    }

    out
}

fn decode(patch: &[u8]) -> Result<(Vec<PatchOp>, u64)> {
    let mut cursor = Cursor::new(patch);

    if cursor.take(PATCH_MAGIC.len())? != PATCH_MAGIC.as_slice() {
        bail!("not an updelta patch payload");
    }

    let output_size = cursor.u64()?;
    let op_count = cursor.u32()? as usize;

    let mut ops = Vec::with_capacity(op_count.min(1024));
    for _ in 0..op_count {
        match cursor.u8()? {
            OP_COPY => ops.push(PatchOp::Copy {
                offset: cursor.u64()?,
                length: cursor.u64()?,
            }),
            OP_INSERT => {
                let length = cursor.u64()? as usize;
                ops.push(PatchOp::Insert(cursor.take(length)?.to_vec()));
            }
            other => bail!("unknown patch op marker: {:#04x}", other),
        }
    }

    if !cursor.at_end() {
        bail!("trailing bytes after the patch op stream");
    }

    Ok((ops, output_size))
}

/// Bounds-checked reader over the serialized patch
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| anyhow::anyhow!("patch payload truncated"))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(bytes))
    }

    fn u64(&mut self) -> Result<u64> {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(bytes))
    }

    fn at_end(&self) -> bool {
        self.pos == self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_small_edit() {
        let old = b"The quick brown fox jumps over the lazy dog".repeat(200);
        let mut new = old.clone();
        new[5000] ^= 0xff;
        new.extend_from_slice(b"appended tail");

        let patch = create_patch(&old, &new).unwrap();
        let rebuilt = apply_patch(&old, &patch).unwrap();
        assert_eq!(rebuilt, new);
        // Mostly-copy patches stay far below the payload size
        assert!(patch.len() < new.len() / 2);
    }

    #[test]
    fn test_round_trip_degenerate_inputs() {
        let old = vec![0u8; 8192];

        let patch = create_patch(&old, &[]).unwrap();
        assert_eq!(apply_patch(&old, &patch).unwrap(), Vec::<u8>::new());

        let patch = create_patch(&[], &old).unwrap();
        assert_eq!(apply_patch(&[], &patch).unwrap(), old);

        let patch = create_patch(&old, &old).unwrap();
        assert_eq!(apply_patch(&old, &patch).unwrap(), old);
    }

    #[test]
    fn test_deterministic() {
        let old: Vec<u8> = (0..20000u32).map(|i| (i % 251) as u8).collect();
        let mut new = old.clone();
        new[300] = 0;
        new[15000] = 0;

        assert_eq!(create_patch(&old, &new).unwrap(), create_patch(&old, &new).unwrap());
    }

    #[test]
    fn test_rejects_foreign_payload() {
        assert!(apply_patch(b"old", b"not a patch").is_err());
        assert!(apply_patch(b"old", b"").is_err());
    }

    #[test]
    fn test_rejects_truncated_payload() {
        let patch = create_patch(b"hello world", b"hello brave world").unwrap();
        assert!(apply_patch(b"hello world", &patch[..patch.len() - 1]).is_err());
    }

    #[test]
    fn test_rejects_out_of_range_copies() {
        let old = vec![7u8; 10000];
        let mut new = old.clone();
        new[9999] = 9;

        let patch = create_patch(&old, &new).unwrap();
        // A truncated base cannot satisfy the patch's copy ranges
        assert!(apply_patch(&old[..100], &patch).is_err());
    }

    #[test]
    fn test_msdelta_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let patch = dir.path().join("x.diff");
        std::fs::write(&patch, b"PA30").unwrap();

        let err = apply_msdelta(&patch, &dir.path().join("old"), &dir.path().join("out"))
            .unwrap_err();
        assert!(err.to_string().contains("msdelta"));
    }
}
