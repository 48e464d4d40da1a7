//! Example: concurrent readers and writers over an RcuMap, including a
//! live resize from a single bucket.

use petek_map::RcuMap;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

fn main() {
    println!("=== RCU HashMap Demo ===\n");

    // Start deliberately tiny: the inserts below drive several online
    // resizes while readers keep running.
    let map = Arc::new(RcuMap::new(1));

    println!("Benchmarking concurrent inserts (growing from 1 bucket)...");
    let start = Instant::now();
    let mut handles = Vec::new();

    for thread_id in 0..8u64 {
        let map = Arc::clone(&map);
        handles.push(thread::spawn(move || {
            for i in 0..10_000u64 {
                let key = thread_id * 10_000 + i;
                map.insert(key, key * 2);
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let duration = start.elapsed();
    println!(
        "Inserted 80,000 entries from 8 threads in {:?} ({:.2} ops/sec)",
        duration,
        80_000.0 / duration.as_secs_f64()
    );
    println!(
        "Map contains {} entries across {} buckets\n",
        map.len(),
        map.bucket_count()
    );

    println!("Benchmarking concurrent reads...");
    let start = Instant::now();
    let mut handles = Vec::new();

    for _ in 0..8 {
        let map = Arc::clone(&map);
        handles.push(thread::spawn(move || {
            let mut found = 0u64;
            for key in 0..10_000u64 {
                if map.get(&key).is_some() {
                    found += 1;
                }
            }
            found
        }));
    }

    let mut total_found = 0u64;
    for handle in handles {
        total_found += handle.join().unwrap();
    }

    let duration = start.elapsed();
    println!(
        "Performed 80,000 reads from 8 threads in {:?} ({:.2} ops/sec)",
        duration,
        80_000.0 / duration.as_secs_f64()
    );
    println!("Found {total_found} entries during reads\n");

    println!("Benchmarking mixed concurrent operations...");
    let start = Instant::now();
    let mut handles = Vec::new();

    for _ in 0..4 {
        let map = Arc::clone(&map);
        handles.push(thread::spawn(move || {
            for key in 0..5_000u64 {
                let _ = map.get(&key);
            }
        }));
    }
    for thread_id in 0..2u64 {
        let map = Arc::clone(&map);
        handles.push(thread::spawn(move || {
            for i in 0..5_000u64 {
                let key = 80_000 + thread_id * 5_000 + i;
                map.insert(key, key);
            }
        }));
    }
    for thread_id in 0..2u64 {
        let map = Arc::clone(&map);
        handles.push(thread::spawn(move || {
            for i in 0..2_500u64 {
                let key = thread_id * 2_500 + i;
                map.remove(&key);
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let duration = start.elapsed();
    println!("Mixed operations completed in {duration:?}");
    println!(
        "Final map size: {} entries across {} buckets\n",
        map.len(),
        map.bucket_count()
    );

    println!("Verifying data integrity...");
    let mut verified = 0;
    for key in 5_000..10_000u64 {
        if map.get(&key) == Some(key * 2) {
            verified += 1;
        }
    }
    println!("Verified {verified} entries have correct values");

    println!("\n=== Demo Complete ===");
    println!("Readers never blocked — resizes ran entirely online.");
}
