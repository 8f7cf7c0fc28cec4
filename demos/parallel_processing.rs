//! Drives the same database with several consumer threads sharing one
//! `DsqDataReader`, mirroring the N-consumer pipeline model.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;

use dsqdata::testutil::{write_database, TestSequence};
use dsqdata::{Alphabet, DsqDataReaderBuilder};

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let dir = tempfile::tempdir()?;
    let base = dir.path().join("proteins");

    let sequences: Vec<TestSequence> = (0..500)
        .map(|i| {
            let residues: Vec<u8> = (0..20).map(|r| ((i + r) % 20) as u8).collect();
            TestSequence::new("seq", residues)
        })
        .collect();
    write_database(&base, &Alphabet::amino(), &sequences)?;

    let nconsumers = 4;
    let reader = Arc::new(
        DsqDataReaderBuilder::new(&base)
            .chunk_capacity(32)
            .nconsumers(nconsumers)
            .open()?,
    );

    let total = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..nconsumers)
        .map(|worker| {
            let reader = Arc::clone(&reader);
            let total = Arc::clone(&total);
            std::thread::spawn(move || -> Result<usize> {
                let mut local = 0;
                while let Some(chunk) = reader.read()? {
                    local += chunk.n();
                    reader.recycle(chunk);
                }
                total.fetch_add(local, Ordering::Relaxed);
                Ok(local)
            })
        })
        .collect();

    for (worker, handle) in handles.into_iter().enumerate() {
        let local = handle.join().expect("consumer thread panicked")?;
        println!("consumer {worker} processed {local} sequences");
    }

    reader.close()?;
    println!("total sequences processed: {}", total.load(Ordering::Relaxed));
    Ok(())
}
