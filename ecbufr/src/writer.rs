use crate::config::CodecConfig;
use crate::core::FXY;
use crate::core::tables::{DataType, TableLookup, ValueEncoding};
use crate::datablk::{DataBlock, StoreType};
use crate::errors::{Error, Result};
use crate::sequence::{expand, zip};
use crate::structs::bit::BitBuffer;
use crate::structs::versions::BUFRMessage;
use crate::transport::{ByteWriter, write_message};
use crate::value::{missing_ivalue, value_nbits};

/// Most data blocks one message may carry.
pub const MAX_BLOCKS: usize = 200;

/// Width of the increment width field of compressed data.
const NBINC_BITS: u32 = 6;

/// Element descriptors of one block with their encodings.
struct BlockLayout {
    elements: Vec<(FXY, ValueEncoding)>,
}

/// Picks the subset count shared by all blocks: the first T greater than
/// one, or one. Every other block must have that T or exactly one.
fn common_nt(blocks: &[DataBlock]) -> Result<usize> {
    if blocks.is_empty() || blocks.len() > MAX_BLOCKS {
        return Err(Error::IllegalBlockCount(blocks.len()));
    }
    let nt = blocks.iter().map(|b| b.nt()).find(|nt| *nt > 1).unwrap_or(1);
    for (k, blk) in blocks.iter().enumerate() {
        if blk.nt() != 1 && blk.nt() != nt {
            return Err(Error::SubsetMismatch {
                block: k,
                expected: nt,
                found: blk.nt(),
            });
        }
    }
    if nt > u16::MAX as usize {
        return Err(Error::SubsetMismatch {
            block: 0,
            expected: u16::MAX as usize,
            found: nt,
        });
    }
    Ok(nt)
}

/// Resolves the encodings of a block's elements. `too_wide` builds the
/// error for an element wider than 64 bits.
fn layout<T, F>(k: usize, blk: &DataBlock, tables: &T, too_wide: F) -> Result<BlockLayout>
where
    T: TableLookup + ?Sized,
    F: Fn(FXY, &ValueEncoding) -> Error,
{
    if !blk.is_converted() && blk.store_type() != StoreType::Integer {
        return Err(Error::Unconverted);
    }
    if blk.nval() == 0 {
        return Err(Error::IndexOutOfRange(format!("block {} holds no values", k)));
    }

    let mut elements = Vec::with_capacity(blk.nele());
    for i in 0..blk.nele() {
        let descriptor = blk.element(i).ok_or_else(|| {
            Error::IndexOutOfRange(format!("block {} element {} has no descriptor", k, i))
        })?;
        let enc = tables.encoding(&descriptor)?;
        if enc.nbits > 64 {
            return Err(too_wide(descriptor, &enc));
        }
        if enc.nbits == 0 {
            return Err(Error::BitWidth(0));
        }
        elements.push((descriptor, enc));
    }
    Ok(BlockLayout { elements })
}

fn checked_raw(descriptor: FXY, enc: &ValueEncoding, raw: u64) -> Result<u64> {
    match missing_ivalue(enc.nbits) {
        Some(missing) if raw <= missing => Ok(raw),
        _ => Err(Error::ValueOutOfRange {
            descriptor,
            value: raw as f64,
            nbits: enc.nbits,
        }),
    }
}

fn put_uncompressed(
    buf: &mut BitBuffer,
    blocks: &[DataBlock],
    layouts: &[BlockLayout],
    nt: usize,
) -> Result<()> {
    for t in 0..nt {
        for (blk, layout) in blocks.iter().zip(layouts) {
            let it = if blk.nt() > 1 { t } else { 0 };
            for j in 0..blk.nval() {
                for (i, (descriptor, enc)) in layout.elements.iter().enumerate() {
                    let raw = checked_raw(*descriptor, enc, blk.get_int(i, j, it)?)?;
                    buf.put_bits(raw, enc.nbits)?;
                }
            }
        }
    }
    Ok(())
}

/// Reference value, increment width and increments for one element of one
/// value index across all subsets.
fn put_compressed_element(
    buf: &mut BitBuffer,
    descriptor: FXY,
    enc: &ValueEncoding,
    values: &[u64],
    nt: usize,
) -> Result<()> {
    let missing = enc.missing().ok_or(Error::BitWidth(enc.nbits))?;
    let present = || values.iter().copied().filter(|v| !enc.is_missing_raw(&descriptor, *v));

    let (Some(min), Some(max)) = (present().min(), present().max()) else {
        buf.put_bits(missing, enc.nbits)?;
        return buf.put_bits(0, NBINC_BITS);
    };
    let has_missing = present().count() != values.len();

    buf.put_bits(checked_raw(descriptor, enc, min)?, enc.nbits)?;
    if min == max && !has_missing {
        return buf.put_bits(0, NBINC_BITS);
    }

    let nbinc = value_nbits(checked_raw(descriptor, enc, max)? - min);
    if nbinc >= 1 << NBINC_BITS {
        return Err(Error::BitWidth(nbinc));
    }
    buf.put_bits(nbinc as u64, NBINC_BITS)?;
    let inc_missing = missing_ivalue(nbinc).ok_or(Error::BitWidth(nbinc))?;
    for t in 0..nt {
        let v = values[t.min(values.len() - 1)];
        let inc = if enc.is_missing_raw(&descriptor, v) {
            inc_missing
        } else {
            v - min
        };
        buf.put_bits(inc, nbinc)?;
    }
    Ok(())
}

fn put_compressed(
    buf: &mut BitBuffer,
    blocks: &[DataBlock],
    layouts: &[BlockLayout],
    nt: usize,
) -> Result<()> {
    let mut values = Vec::with_capacity(nt);
    for (blk, layout) in blocks.iter().zip(layouts) {
        for j in 0..blk.nval() {
            for (i, (descriptor, enc)) in layout.elements.iter().enumerate() {
                values.clear();
                for t in 0..blk.nt() {
                    values.push(blk.get_int(i, j, t)?);
                }
                put_compressed_element(buf, *descriptor, enc, &values, nt)?;
            }
        }
    }
    Ok(())
}

/// Builds sections 3 and 4 of `msg` from data blocks.
///
/// Section 3 lists one `1-NELE-NVAL` replication per block followed by the
/// block's element descriptors, compacted with Table D. Compression is only
/// applied when the common subset count is above one.
pub fn pack_datablks<T: TableLookup + ?Sized>(
    msg: &mut BUFRMessage,
    blocks: &[DataBlock],
    compress: bool,
    tables: &T,
    config: &CodecConfig,
) -> Result<()> {
    let nt = common_nt(blocks)?;
    let compress = compress && nt > 1;

    let layouts = blocks
        .iter()
        .enumerate()
        .map(|(k, blk)| {
            layout(k, blk, tables, |descriptor, enc| {
                config.abort(&format!(
                    "{} is {} bits wide, at most 64 are supported",
                    descriptor, enc.nbits
                ))
            })
        })
        .collect::<Result<Vec<_>>>()?;

    msg.begin_message();
    msg.section3.set_compressed(compress);
    msg.section3.set_observation(false);
    msg.section3.number_of_subsets = nt as u16;

    let mut descriptors = Vec::new();
    let mut blen = 0usize;
    let mut nbinc = 0usize;
    for (blk, layout) in blocks.iter().zip(&layouts) {
        descriptors.push(FXY::replication(blk.nele(), blk.nval())?);
        descriptors.extend(layout.elements.iter().map(|(d, _)| *d));
        let klen: usize = layout.elements.iter().map(|(_, e)| e.nbits as usize).sum();
        blen += klen * blk.nval();
        nbinc += NBINC_BITS as usize * blk.nele() * blk.nval();
    }
    msg.set_descriptors(zip(tables, &descriptors)?);

    let payload = msg.payload_mut();
    payload.reserve((blen * (nt + 1) + nbinc).div_ceil(8));
    if compress {
        put_compressed(payload, blocks, &layouts, nt)?;
    } else {
        put_uncompressed(payload, blocks, &layouts, nt)?;
    }

    if config.debug {
        tracing::debug!(
            "packed {} blocks, {} subsets, {} payload bits, compressed: {}",
            blocks.len(),
            nt,
            msg.payload().len_bits(),
            compress
        );
    }
    msg.end_message()
}

/// [`pack_datablks`], then sends the message through `writer`.
pub fn write_datablks<W: ByteWriter + ?Sized, T: TableLookup + ?Sized>(
    writer: &mut W,
    msg: &mut BUFRMessage,
    blocks: &[DataBlock],
    compress: bool,
    tables: &T,
    config: &CodecConfig,
) -> Result<usize> {
    pack_datablks(msg, blocks, compress, tables, config)?;
    write_message(writer, msg)
}

/// Splits an expanded section 3 into block layouts: each fixed replication
/// of elements is one block, and a run of plain elements is a block with a
/// single value index.
fn split_blocks(descriptors: &[FXY]) -> Result<Vec<(Vec<FXY>, usize)>> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < descriptors.len() {
        let d = descriptors[i];
        if d.is_replication() && d.y > 0 {
            let end = i + 1 + d.x as usize;
            let body = descriptors.get(i + 1..end).ok_or_else(|| {
                Error::MalformedReplication(format!("{} runs past section 3", d))
            })?;
            if let Some(bad) = body.iter().find(|e| !e.is_element()) {
                return Err(Error::ParseError(format!(
                    "{} inside block replication {} is not an element",
                    bad, d
                )));
            }
            out.push((body.to_vec(), d.y as usize));
            i = end;
        } else if d.is_element() {
            let run = descriptors[i..]
                .iter()
                .take_while(|e| e.is_element())
                .count();
            out.push((descriptors[i..i + run].to_vec(), 1));
            i += run;
        } else {
            return Err(Error::ParseError(format!(
                "{} cannot be read as part of a data block",
                d
            )));
        }
    }
    Ok(out)
}

/// Rebuilds integer data blocks from sections 3 and 4 of `msg`. Every block
/// carries one repetition per data subset.
pub fn read_datablks<T: TableLookup + ?Sized>(
    msg: &BUFRMessage,
    tables: &T,
    config: &CodecConfig,
) -> Result<Vec<DataBlock>> {
    let descriptors = expand(tables, msg.descriptors())?;
    let nt = msg.subsets_count() as usize;

    let mut blocks = Vec::new();
    let mut layouts = Vec::new();
    for (k, (elements, nval)) in split_blocks(&descriptors)?.into_iter().enumerate() {
        let mut blk = DataBlock::with_dims(StoreType::Integer, elements.len(), nval, nt);
        for (i, e) in elements.iter().enumerate() {
            blk.set_element(i, *e)?;
        }
        // data blocks hold integers, so wide strings cannot be read back
        layouts.push(layout(k, &blk, tables, |descriptor, enc| {
            if enc.data_type == DataType::String {
                Error::ValueType {
                    descriptor,
                    data_type: enc.data_type,
                }
            } else {
                Error::BitWidth(enc.nbits)
            }
        })?);
        blocks.push(blk);
    }

    let mut buf = msg.payload().clone();
    buf.rewind();
    if msg.is_compressed() {
        for (blk, layout) in blocks.iter_mut().zip(&layouts) {
            for j in 0..blk.nval() {
                for (i, (_, enc)) in layout.elements.iter().enumerate() {
                    let reference = buf.get_bits(enc.nbits)?;
                    let nbinc = buf.get_bits(NBINC_BITS)? as u32;
                    if nbinc == 0 {
                        for t in 0..nt {
                            blk.set_int(i, j, t, reference)?;
                        }
                        continue;
                    }
                    let missing = enc.missing().ok_or(Error::BitWidth(enc.nbits))?;
                    let inc_missing = missing_ivalue(nbinc).ok_or(Error::BitWidth(nbinc))?;
                    for t in 0..nt {
                        let inc = buf.get_bits(nbinc)?;
                        let raw = if inc == inc_missing {
                            missing
                        } else {
                            reference.saturating_add(inc)
                        };
                        blk.set_int(i, j, t, raw)?;
                    }
                }
            }
        }
    } else {
        for t in 0..nt {
            for (blk, layout) in blocks.iter_mut().zip(&layouts) {
                for j in 0..blk.nval() {
                    for (i, (_, enc)) in layout.elements.iter().enumerate() {
                        let raw = buf.get_bits(enc.nbits)?;
                        blk.set_int(i, j, t, raw)?;
                    }
                }
            }
        }
    }

    if config.verbose {
        tracing::info!(
            "read {} blocks over {} subsets, {} of {} payload bits used",
            blocks.len(),
            nt,
            buf.position(),
            buf.len_bits()
        );
    }
    Ok(blocks)
}
