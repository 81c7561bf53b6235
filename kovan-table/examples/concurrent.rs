//! Example: a session index read by many threads and updated by one
//!
//! Readers look sessions up by (address pair, port) while a single writer
//! opens and closes sessions. Occupancy statistics are printed at the end.

use kovan_table::{CompositeKey, Table};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Instant;

#[derive(Debug, Clone)]
struct Session {
    id: u64,
    peer: String,
}

fn session_key(id: u64) -> CompositeKey {
    let src = 0x0a00_0000_0000_0000 | id;
    let dst = 0xc0a8_0000_0000_0001;
    CompositeKey::from_u160(src, dst, (id % 65_536) as u32)
}

fn main() {
    println!("=== kovan-table session index demo ===\n");

    println!(
        "Entry footprint: {} bytes",
        Table::<Session>::entry_footprint()
    );

    let mut table = Table::new(65_536).expect("bucket allocation");
    println!(
        "Allocated {} buckets ({} bits), {} bytes\n",
        table.bucket_count(),
        table.bits(),
        table.footprint()
    );

    for id in 0..50_000 {
        let session = Session {
            id,
            peer: format!("peer-{id}"),
        };
        table.add(session_key(id), session).expect("unique session");
    }

    let stop = Arc::new(AtomicBool::new(false));
    let hits = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let mut handles = Vec::new();
    for t in 0..8 {
        let reader = table.reader();
        let stop = stop.clone();
        let hits = hits.clone();
        handles.push(thread::spawn(move || {
            let mut id = t;
            while !stop.load(Ordering::Relaxed) {
                let found = reader
                    .lookup_with(&session_key(id % 60_000), |s| s.id == id % 60_000)
                    .unwrap_or(false);
                if found {
                    hits.fetch_add(1, Ordering::Relaxed);
                }
                id += 8;
            }
        }));
    }

    // Close the first 10k sessions and open 10k new ones.
    for id in 0..10_000 {
        table.remove(&session_key(id)).expect("open session");
        let id = 50_000 + id;
        table
            .add(
                session_key(id),
                Session {
                    id,
                    peer: format!("peer-{id}"),
                },
            )
            .expect("unique session");
    }

    stop.store(true, Ordering::Relaxed);
    for handle in handles {
        handle.join().unwrap();
    }

    println!(
        "Readers resolved {} lookups while the writer churned 20,000 sessions in {:?}",
        hits.load(Ordering::Relaxed),
        start.elapsed()
    );
    println!("Table holds {} sessions\n", table.size());

    if let Some((_, session)) = table.nth(100) {
        println!("Session at offset 100: #{} ({})", session.id, session.peer);
    }

    let mut long_ids = 0;
    let _ = table.foreach(|_, session| {
        if session.id >= 50_000 {
            long_ids += 1;
        }
        ControlFlow::Continue(())
    });
    println!("Sessions opened during the run: {long_ids}\n");

    match table.stats() {
        Ok(stats) => println!("{stats}"),
        Err(e) => println!("stats unavailable: {e}"),
    }

    table.terminate();
}
