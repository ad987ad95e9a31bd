mod common;

use common::{CardKind, SDHC_BLOCKS, SimCard, sim, started};
use embedded_io::SeekFrom;
use embedded_io::blocking::{Read, Seek, Write};
use sdio_card::session::SessionState;
use sdio_card::stream::BlockStream;
use sdio_card::transfer::MAX_BLOCKS_PER_TRANSFER;
use sdio_card::{Block, SdioError};

fn patterned(seed: u8) -> Block {
    let mut bytes = [0u8; 512];
    for (i, byte) in bytes.iter_mut().enumerate() {
        *byte = seed ^ (i as u8).rotate_left(3);
    }
    Block::from_bytes(&bytes)
}

#[test]
fn read_block_high_capacity() {
    let mut card = started(CardKind::HighCapacity);
    let mut block = Block::new();

    card.read_block(5, &mut block).unwrap();

    assert_eq!(block.as_bytes(), &SimCard::pristine(5 * 512));
    assert_eq!(card.state(), SessionState::Transfer);
    let last = *sim(&mut card).log.last().unwrap();
    assert_eq!((last.index, last.arg), (17, 5));
}

#[test]
fn read_block_standard_capacity_uses_byte_address() {
    let mut card = started(CardKind::Legacy);
    let mut block = Block::new();

    let address = card.address_for_block(5).unwrap();
    assert_eq!(address, 2560);

    card.read_block(address, &mut block).unwrap();
    assert_eq!(block.as_bytes(), &SimCard::pristine(2560));

    // A block number is a misaligned byte address on SDSC
    assert!(matches!(
        card.read_block(5, &mut block),
        Err(SdioError::AddressError {})
    ));
    assert_eq!(card.state(), SessionState::Transfer);
}

#[test]
fn same_block_number_means_different_bytes_per_class() {
    let mut sdhc = started(CardKind::HighCapacity);
    let mut sdsc = started(CardKind::Legacy);
    let mut block = Block::new();

    sdhc.read_block(1024, &mut block).unwrap();
    assert_eq!(block.as_bytes(), &SimCard::pristine(524_288));

    sdsc.read_block(1024, &mut block).unwrap();
    assert_eq!(block.as_bytes(), &SimCard::pristine(1024));
}

#[test]
fn write_block_then_read_back() {
    let mut card = started(CardKind::HighCapacity);
    let written = patterned(0x5A);

    card.write_block(42, &written).unwrap();
    assert_eq!(sim(&mut card).block_at(42 * 512), *written.as_bytes());

    // Programming finished before write_block returned
    let indices = sim(&mut card).indices();
    let cmd24 = indices.iter().rposition(|&i| i == 24).unwrap();
    assert!(indices[cmd24 + 1..].iter().filter(|&&i| i == 13).count() >= 2);

    let mut read = Block::new();
    card.read_block(42, &mut read).unwrap();
    assert_eq!(read, written);
}

#[test]
fn write_waits_out_a_slow_card() {
    let mut card = started(CardKind::Legacy);
    sim(&mut card).program_polls = 20;

    card.write_block(0, &patterned(1)).unwrap();

    let polls = sim(&mut card).indices().iter().filter(|&&i| i == 13).count();
    assert!(polls >= 20);
}

#[test]
fn data_crc_failure_aborts_without_disconnecting() {
    let mut card = started(CardKind::HighCapacity);
    sim(&mut card).read_crc_failures = 1;
    let mut block = patterned(0x11);

    assert!(matches!(
        card.read_block(7, &mut block),
        Err(SdioError::DataCrcFail {})
    ));
    assert_eq!(card.state(), SessionState::Transfer);

    // Nothing from the failed read reached the caller
    assert_eq!(block, patterned(0x11));

    // Not retried, but the next transfer works
    let reads = sim(&mut card).indices().iter().filter(|&&i| i == 17).count();
    assert_eq!(reads, 1);
    card.read_block(7, &mut block).unwrap();
    assert_eq!(block.as_bytes(), &SimCard::pristine(7 * 512));
}

#[test]
fn locked_card_refuses_data() {
    let mut sim_card = SimCard::new(CardKind::HighCapacity);
    sim_card.locked = true;
    let mut card = common::session(sim_card);
    card.begin().unwrap();
    let mut block = patterned(0x22);

    assert!(matches!(
        card.read_block(3, &mut block),
        Err(SdioError::CardIsLocked {})
    ));
    assert!(matches!(
        card.write_block(3, &patterned(0x33)),
        Err(SdioError::CardIsLocked {})
    ));

    assert_eq!(block, patterned(0x22));
    assert_eq!(sim(&mut card).block_at(3 * 512), SimCard::pristine(3 * 512));
    assert_eq!(card.state(), SessionState::Transfer);
}

#[test]
fn out_of_range_read_is_refused() {
    let mut card = started(CardKind::HighCapacity);
    let mut block = Block::new();

    assert!(matches!(
        card.read_block(SDHC_BLOCKS, &mut block),
        Err(SdioError::OutOfRange {})
    ));
}

#[test]
fn multiple_blocks_round_trip() {
    let mut card = started(CardKind::HighCapacity);
    let blocks = [patterned(1), patterned(2), patterned(3)];

    card.write_blocks(100, &blocks).unwrap();

    for (n, block) in blocks.iter().enumerate() {
        assert_eq!(sim(&mut card).block_at((100 + n as u64) * 512), *block.as_bytes());
    }

    let mut read = [Block::new(); 3];
    card.read_blocks(100, &mut read).unwrap();
    assert_eq!(read, blocks);

    let indices = sim(&mut card).indices();
    let cmd25 = indices.iter().position(|&i| i == 25).unwrap();
    let cmd18 = indices.iter().position(|&i| i == 18).unwrap();
    assert_eq!(indices[cmd25 + 1], 12);
    assert_eq!(indices[cmd18 + 1], 12);
    assert_eq!(card.state(), SessionState::Transfer);
}

#[test]
fn longest_multi_block_run_completes() {
    let mut card = started(CardKind::HighCapacity);
    let mut blocks = vec![Block::new(); MAX_BLOCKS_PER_TRANSFER];

    card.read_blocks(0, &mut blocks).unwrap();

    let last = MAX_BLOCKS_PER_TRANSFER - 1;
    assert_eq!(blocks[0].as_bytes(), &SimCard::pristine(0));
    assert_eq!(blocks[last].as_bytes(), &SimCard::pristine(last as u64 * 512));

    let indices = sim(&mut card).indices();
    assert_eq!(indices.iter().filter(|&&i| i == 18).count(), 1);
    assert_eq!(indices.last(), Some(&12));
    assert_eq!(card.state(), SessionState::Transfer);
}

#[test]
fn multiple_blocks_on_standard_capacity() {
    let mut card = started(CardKind::Legacy);
    let blocks = [patterned(7), patterned(8)];
    let address = card.address_for_block(3).unwrap();

    card.write_blocks(address, &blocks).unwrap();

    assert_eq!(sim(&mut card).block_at(3 * 512), *blocks[0].as_bytes());
    assert_eq!(sim(&mut card).block_at(4 * 512), *blocks[1].as_bytes());
}

#[test]
fn transfers_need_an_initialized_card() {
    let mut card = common::session(SimCard::new(CardKind::HighCapacity));
    let mut block = Block::new();

    assert!(matches!(
        card.read_block(0, &mut block),
        Err(SdioError::NotReady {
            state: SessionState::Uninitialized
        })
    ));
    assert!(sim(&mut card).log.is_empty());
}

#[test]
fn standby_card_is_selected_for_transfer() {
    let mut card = started(CardKind::HighCapacity);
    card.deselect().unwrap();
    let mut block = Block::new();

    card.read_block(9, &mut block).unwrap();

    assert_eq!(card.state(), SessionState::Transfer);
    assert_eq!(block.as_bytes(), &SimCard::pristine(9 * 512));
}

#[test]
fn stream_reads_across_blocks() {
    let mut card = started(CardKind::HighCapacity);
    let mut stream = BlockStream::new(&mut card).unwrap();
    assert_eq!(stream.len(), SDHC_BLOCKS as u64 * 512);

    stream.seek(SeekFrom::Start(510)).unwrap();
    let mut bytes = [0u8; 6];
    stream.read_exact(&mut bytes).unwrap();

    let first = SimCard::pristine(0);
    let second = SimCard::pristine(512);
    assert_eq!(&bytes[..2], &first[510..]);
    assert_eq!(&bytes[2..], &second[..4]);
    assert_eq!(stream.position(), 516);
}

#[test]
fn stream_writes_are_flushed() {
    let mut card = started(CardKind::HighCapacity);
    let mut stream = BlockStream::new(&mut card).unwrap();

    stream.seek(SeekFrom::Start(1020)).unwrap();
    stream.write_all(b"hello sd").unwrap();
    let card = stream.finish().unwrap();

    let first = sim(card).block_at(512);
    let second = sim(card).block_at(1024);
    assert_eq!(&first[508..], b"hell");
    assert_eq!(&second[..4], b"o sd");

    // Bytes around the write are untouched
    assert_eq!(&first[..508], &SimCard::pristine(512)[..508]);
    assert_eq!(&second[4..], &SimCard::pristine(1024)[4..]);
}

#[test]
fn stream_writes_stay_cached_until_flush() {
    let mut card = started(CardKind::HighCapacity);
    let mut stream = BlockStream::new(&mut card).unwrap();

    stream.write_all(&[0xEE; 16]).unwrap();
    stream.seek(SeekFrom::Start(0)).unwrap();
    let mut bytes = [0u8; 16];
    stream.read_exact(&mut bytes).unwrap();
    assert_eq!(bytes, [0xEE; 16]);

    stream.flush().unwrap();
    drop(stream);
    assert_eq!(&sim(&mut card).block_at(0)[..16], &[0xEE; 16]);
}

#[test]
fn stream_seek_bounds() {
    let mut card = started(CardKind::Legacy);
    let mut stream = BlockStream::new(&mut card).unwrap();
    let len = stream.len();

    assert_eq!(stream.seek(SeekFrom::End(-4)).unwrap(), len - 4);
    assert_eq!(stream.seek(SeekFrom::Current(2)).unwrap(), len - 2);
    assert!(matches!(
        stream.seek(SeekFrom::Current(3)),
        Err(SdioError::SeekOutOfRange {})
    ));
    assert!(matches!(
        stream.seek(SeekFrom::Current(-(len as i64) - 1)),
        Err(SdioError::SeekOutOfRange {})
    ));

    let mut bytes = [0u8; 8];
    assert_eq!(stream.read(&mut bytes).unwrap(), 2);
    assert_eq!(stream.read(&mut bytes).unwrap(), 0);
}
