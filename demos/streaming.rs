//! Writes a small fixture database, then streams it back sequentially
//! with a single consumer, the simplest way to drive `DsqDataReader`.

use anyhow::Result;

use dsqdata::testutil::{write_database, TestSequence};
use dsqdata::{Alphabet, DsqDataReader};

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let dir = tempfile::tempdir()?;
    let base = dir.path().join("proteins");

    let sequences = vec![
        TestSequence::new("seq1", b"ACDEFGHIKL".to_vec()),
        TestSequence::new("seq2", b"MNPQRSTVWY".to_vec()),
        TestSequence::new("seq3", b"ACDEFGHIKLMNPQRSTVWY".to_vec()),
    ];
    write_database(&base, &Alphabet::amino(), &sequences)?;
    println!("wrote {} sequences to {}", sequences.len(), base.display());

    let reader = DsqDataReader::open(&base, None)?;
    println!("opened database: nseq = {}", reader.nseq());

    let mut count = 0;
    while let Some(chunk) = reader.read()? {
        for seq in chunk.iter() {
            println!(
                "sequence {}: name = {:?}, length = {}",
                seq.index(),
                String::from_utf8_lossy(seq.name()),
                seq.len()
            );
            count += 1;
        }
        reader.recycle(chunk);
    }
    reader.close()?;

    println!("read {count} sequences");
    Ok(())
}
