//! The unpacker thread (§4.3)
//!
//! Takes raw chunks off `loader_outbox`, decodes their packed 5-bit
//! residues in place (see [`crate::chunk`] for the aliasing argument),
//! resolves each sequence's metadata pointers, and publishes the
//! finished chunk to `unpacker_outbox`. A database that fails any of
//! the checks below never results in a partially-decoded chunk reaching
//! a consumer: corruption is recorded in the shared error slot and an
//! empty end-of-stream chunk is published instead.

use std::sync::{Arc, Mutex};

use byteorder::{ByteOrder, LittleEndian};

use crate::alphabet::{Alphabet, PACKED_SENTINEL_FIELD};
use crate::chunk::Chunk;
use crate::error::Error;
use crate::format::{EOS_BIT, FIELD_BITS, FIELD_MASK, MODE_BIT, RESIDUES_PER_WORD};
use crate::slot::{RecyclingStack, Slot};
use crate::Result;

/// Decodes every packed word currently loaded into `chunk` into residues
/// written over the same buffer, and resolves each sequence's metadata
/// pointers. On success `chunk.n() == chunk.pending_n`.
fn unpack(chunk: &mut Chunk, alphabet: &Alphabet) -> Result<()> {
    if chunk.pending_n == 0 {
        return Ok(());
    }

    let pn = chunk.pn;
    let sentinel = alphabet.sentinel();

    let mut write_pos: usize = 0;
    chunk.smem[write_pos] = sentinel;
    write_pos += 1;
    let mut seq_start = write_pos;
    let mut meta_cursor: usize = 0;
    let packed_base = chunk.smem.len() - pn * 4;

    for word_idx in 0..pn {
        let off = packed_base + word_idx * 4;
        let word = u32::from_ne_bytes(
            chunk.smem[off..off + 4]
                .try_into()
                .expect("4-byte slice"),
        );

        if word & MODE_BIT != 0 {
            return Err(Error::corruption(
                "packed word uses an unsupported packing mode",
            ));
        }
        let is_terminal = word & EOS_BIT != 0;

        for field_idx in 0..RESIDUES_PER_WORD {
            let shift = (RESIDUES_PER_WORD - 1 - field_idx) * FIELD_BITS;
            let field = (word >> shift) & FIELD_MASK;

            if field == u32::from(PACKED_SENTINEL_FIELD) {
                if !is_terminal {
                    return Err(Error::corruption(
                        "packed sentinel field seen in a non-terminal word",
                    ));
                }
                break;
            }
            if field >= alphabet.k() {
                return Err(Error::corruption(format!(
                    "packed residue field {field} is outside the database's alphabet (K={})",
                    alphabet.k()
                )));
            }

            chunk.smem[write_pos] = field as u8;
            write_pos += 1;
        }

        if is_terminal {
            if chunk.n() >= chunk.pending_n {
                return Err(Error::corruption(
                    "more sequences decoded than the index promised",
                ));
            }
            let len = (write_pos - seq_start) as u32;
            chunk.smem[write_pos] = sentinel;
            write_pos += 1;

            let (name, rest_after_name) = split_cstr(&chunk.metadata, meta_cursor)?;
            let (acc, rest_after_acc) = split_cstr(&chunk.metadata, rest_after_name)?;
            let (desc, rest_after_desc) = split_cstr(&chunk.metadata, rest_after_acc)?;
            if rest_after_desc + 4 > chunk.metadata.len() {
                return Err(Error::corruption(
                    "metadata buffer ended before a taxonomy id",
                ));
            }
            let taxid = LittleEndian::read_i32(&chunk.metadata[rest_after_desc..rest_after_desc + 4]);
            meta_cursor = rest_after_desc + 4;

            chunk.push_sequence(seq_start as u32, len);
            chunk.set_metadata_pointers(name, acc, desc, taxid);

            seq_start = write_pos;
        }
    }

    if chunk.n() != chunk.pending_n {
        return Err(Error::corruption(
            "loader's index run ended mid-sequence: fewer sequences decoded than promised",
        ));
    }
    if meta_cursor != chunk.metadata.len() {
        return Err(Error::corruption(
            "metadata buffer had bytes left over after resolving every sequence",
        ));
    }

    Ok(())
}

/// Scans `buf` starting at `from` for a NUL terminator and returns the
/// byte range before it (as metadata-buffer offsets) plus the offset
/// just past the terminator.
fn split_cstr(buf: &[u8], from: usize) -> Result<((u32, u32), usize)> {
    let rel = buf
        .get(from..)
        .and_then(|tail| tail.iter().position(|&b| b == 0))
        .ok_or_else(|| Error::corruption("metadata field is missing its NUL terminator"))?;
    let end = from + rel;
    Ok(((from as u32, end as u32), end + 1))
}

/// Runs the unpacker thread body: decode, resolve metadata, publish,
/// repeat until an end-of-stream chunk has been forwarded.
pub(crate) fn run(
    alphabet: Alphabet,
    inbox: Arc<Slot<Chunk>>,
    outbox: Arc<Slot<Chunk>>,
    recycling: Arc<RecyclingStack>,
    error_slot: Arc<Mutex<Option<Error>>>,
) {
    loop {
        let Some(mut chunk) = inbox.take() else {
            return;
        };

        if error_slot.lock().unwrap_or_else(std::sync::PoisonError::into_inner).is_some() {
            chunk.reset_for_load(chunk.i0());
            if let Some(chunk) = outbox.put(chunk) {
                recycling.recycle(chunk);
            }
            return;
        }

        let is_eos = chunk.pending_n == 0;
        if !is_eos {
            if let Err(err) = unpack(&mut chunk, &alphabet) {
                tracing::error!(error = %err, i0 = chunk.i0(), "unpacker hit corruption");
                *error_slot.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(err);
                chunk.reset_for_load(chunk.i0());
                if let Some(chunk) = outbox.put(chunk) {
                    recycling.recycle(chunk);
                }
                return;
            }
        }

        tracing::debug!(i0 = chunk.i0(), n = chunk.n(), "unpacker publishing chunk");
        if let Some(chunk) = outbox.put(chunk) {
            recycling.recycle(chunk);
            return;
        }
        if is_eos {
            return;
        }
    }
}
