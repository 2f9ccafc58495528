use std::io::Write;

use flate2::{Compression, write::GzEncoder};
use libecbufr::{
    BTableEntry, BUFRMessage, CodecConfig, DTableEntry, DataBlock, Error, FXY, MessageStream,
    StoreType, TableSet, Tables, memread_message, pack_datablks, parse_bytes, read_datablks,
    read_message, transport::MemoryReader, write_datablks, write_message_to,
};

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn f(code: i32) -> FXY {
    FXY::from_code(code)
}

fn master() -> TableSet {
    TableSet::from_entries(
        [
            BTableEntry::new(f(1001), "WMO BLOCK NUMBER", "NUMERIC", 0, 0, 7),
            BTableEntry::new(f(1002), "WMO STATION NUMBER", "NUMERIC", 0, 0, 10),
            BTableEntry::new(f(5001), "LATITUDE", "DEGREE", 5, -9000000, 25),
            BTableEntry::new(f(6001), "LONGITUDE", "DEGREE", 5, -18000000, 26),
            BTableEntry::new(f(12001), "TEMPERATURE", "K", 1, 0, 12),
            BTableEntry::new(f(10004), "PRESSURE", "PA", -1, 0, 14),
        ],
        [
            DTableEntry::new(f(301001), vec![f(1001), f(1002)]),
            DTableEntry::new(f(301021), vec![f(5001), f(6001)]),
            DTableEntry::new(f(301090), vec![f(301001), f(301021)]),
        ],
    )
}

fn station_blocks(tables: &Tables) -> anyhow::Result<Vec<DataBlock>> {
    let mut station = DataBlock::with_dims(StoreType::Double, 4, 1, 1);
    for (i, code) in [1001, 1002, 5001, 6001].into_iter().enumerate() {
        station.set_element(i, f(code))?;
    }
    station.set_double(0, 0, 0, 71.0)?;
    station.set_double(1, 0, 0, 627.0)?;
    station.set_double(2, 0, 0, 45.47)?;
    station.set_double(3, 0, 0, -73.75)?;
    station.convert(tables)?;

    let mut obs = DataBlock::with_dims(StoreType::Float, 2, 1, 4);
    obs.set_element(0, f(12001))?;
    obs.set_element(1, f(10004))?;
    for (t, (temp, pres)) in [(271.3, 101320.0), (271.9, 101310.0), (f32::MAX, 101300.0), (272.4, 101300.0)]
        .into_iter()
        .enumerate()
    {
        obs.set_float(0, 0, t, temp)?;
        obs.set_float(1, 0, t, pres)?;
    }
    obs.convert(tables)?;
    Ok(vec![station, obs])
}

#[test]
fn test_compressed_message_over_the_wire() -> anyhow::Result<()> {
    init_logging();
    let tables = Tables::new(master());
    let cfg = CodecConfig::default();
    let blocks = station_blocks(&tables)?;

    let mut msg = BUFRMessage::new(4)?;
    msg.set_time(2025, 12, 17, 9, 0, 0);
    let mut wire = Vec::new();
    write_datablks(
        &mut libecbufr::transport::StreamWriter::new(&mut wire),
        &mut msg,
        &blocks,
        true,
        &tables,
        &cfg,
    )?;

    assert_eq!(msg.descriptors(), &[f(101001), f(301090), f(102001), f(12001), f(10004)]);
    let lengths = msg.section_lengths();
    assert_eq!(lengths.total(), wire.len());
    assert_eq!(lengths.section0 + lengths.section1 + lengths.section3, 8 + 22 + 7 + 2 * 5);

    let (read, consumed) = memread_message(&wire, wire.len(), &cfg)?;
    let read = read.expect("one message");
    assert_eq!(consumed, wire.len());
    assert!(read.is_compressed());
    assert_eq!(read.subsets_count(), 4);
    assert_eq!(read.section1.year, 2025);

    let decoded = read_datablks(&read, &tables, &cfg)?;
    assert_eq!(decoded.len(), 2);
    assert_eq!(decoded[0].elements(), &[f(1001), f(1002), f(5001), f(6001)]);
    assert_eq!(decoded[0].physical(&tables, 2, 0, 3)?, Some(45.47));
    assert_eq!(decoded[1].physical(&tables, 0, 0, 1)?, Some(271.9));
    assert_eq!(decoded[1].physical(&tables, 0, 0, 2)?, None);
    assert_eq!(decoded[1].physical(&tables, 1, 0, 3)?, Some(101300.0));
    Ok(())
}

#[test]
fn test_uncompressed_edition3_with_local_tables() -> anyhow::Result<()> {
    let mut local = TableSet::new();
    local.insert_b(BTableEntry::new(f(12001), "LOCAL TEMPERATURE", "K", 2, 0, 16));
    let tables = Tables::new(master()).with_local(local);
    let cfg = CodecConfig::default();

    let mut blk = DataBlock::with_dims(StoreType::Float, 1, 2, 3);
    blk.set_element(0, f(12001))?;
    for t in 0..3 {
        blk.set_float(0, 0, t, 250.0 + t as f32)?;
        blk.set_float(0, 1, t, 260.25)?;
    }
    blk.convert(&tables)?;

    let mut msg = BUFRMessage::new(3)?;
    msg.set_section2(b"local");
    pack_datablks(&mut msg, &[blk], false, &tables, &cfg)?;
    let bytes = msg.to_bytes()?;
    assert_eq!(bytes.len() % 2, 0);
    assert_eq!(msg.payload().len_bits(), 3 * 2 * 16);

    let parsed = BUFRMessage::parse(&bytes)?;
    assert_eq!(parsed.section2.as_ref().map(|s| s.data.len()), Some(6));
    let decoded = read_datablks(&parsed, &tables, &cfg)?;
    assert_eq!(decoded[0].physical(&tables, 0, 0, 2)?, Some(252.0));
    assert_eq!(decoded[0].physical(&tables, 0, 1, 1)?, Some(260.25));
    Ok(())
}

#[test]
fn test_corrupt_terminator_is_a_framing_error() -> anyhow::Result<()> {
    let mut msg = BUFRMessage::new(4)?;
    msg.end_message()?;
    let mut bytes = msg.to_bytes()?;
    let n = bytes.len();
    bytes[n - 4..].copy_from_slice(b"7770");

    let result = read_message(&mut MemoryReader::new(&bytes), &CodecConfig::default());
    match result {
        Err(e) => {
            assert!(e.is_framing());
            assert!(matches!(e, Error::BadTerminator(marker) if &marker == b"7770"));
        }
        Ok(_) => panic!("corrupt message was accepted"),
    }
    Ok(())
}

#[test]
fn test_files_and_gzip() -> anyhow::Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let tables = Tables::new(master());
    let cfg = CodecConfig::default();

    let plain_path = dir.path().join("obs.bufr");
    {
        let mut file = std::fs::File::create(&plain_path)?;
        for edition in [2, 3, 4] {
            let mut msg = BUFRMessage::new(edition)?;
            pack_datablks(&mut msg, &station_blocks(&tables)?, true, &tables, &cfg)?;
            write_message_to(&mut file, &msg)?;
            file.write_all(b"\r\r\n")?;
        }
    }

    let editions: Vec<u8> = MessageStream::open(&plain_path, cfg.clone())?
        .map(|m| m.map(|m| m.edition()))
        .collect::<Result<_, _>>()?;
    assert_eq!(editions, vec![2, 3, 4]);

    let raw = std::fs::read(&plain_path)?;
    let gz_path = dir.path().join("obs.bufr.gz");
    let mut encoder = GzEncoder::new(std::fs::File::create(&gz_path)?, Compression::default());
    encoder.write_all(&raw)?;
    encoder.finish()?;

    let from_gz = libecbufr::parse_with(&gz_path, &cfg)?;
    let from_plain = libecbufr::parse_with(&plain_path, &cfg)?;
    assert_eq!(from_gz.message_count(), 3);
    for (a, b) in from_gz.iter().zip(&from_plain) {
        assert_eq!(a.offset(), b.offset());
        assert_eq!(a.to_bytes()?, b.to_bytes()?);
    }
    assert_eq!(from_plain.message_at(1).map(|m| m.header.clone()), Some(b"\r\r\n".to_vec()));
    Ok(())
}

#[test]
fn test_resync_in_concatenated_buffer() -> anyhow::Result<()> {
    let cfg = CodecConfig::default();
    let mut good = BUFRMessage::new(4)?;
    good.end_message()?;
    let good = good.to_bytes()?;

    let mut data = Vec::new();
    data.extend(&good);
    data.extend(b"BUFR\x00\x00\x20\x09garbage");
    data.extend(&good);

    let stream: Vec<_> = MessageStream::new(MemoryReader::new(&data), cfg.clone()).collect();
    assert_eq!(stream.len(), 3);
    assert!(matches!(stream[1], Err(Error::UnsupportedVersion(9))));
    assert!(stream[2].is_ok());

    let file = parse_bytes(&data, &cfg)?;
    assert_eq!(file.message_count(), 2);
    Ok(())
}
