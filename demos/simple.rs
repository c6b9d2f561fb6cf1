//! Simple usage example

use std::sync::Arc;
use std::thread;
use ticket_mpmc::Queue;

fn main() {
    println!("ticket_mpmc - Simple Example\n");

    // Create a queue with 16 slots
    let queue = Arc::new(Queue::<String, 16>::new());

    let producer_queue = queue.clone();
    let consumer_queue = queue.clone();

    let producer = thread::spawn(move || {
        for i in 0..10 {
            let message = format!("Message {}", i);
            println!("Sending: {}", message);
            producer_queue.push(message);

            // Small delay to make output readable
            thread::sleep(std::time::Duration::from_millis(100));
        }
        producer_queue.close();
        println!("Producer finished!");
    });

    let consumer = thread::spawn(move || {
        while let Some(message) = consumer_queue.pop() {
            println!("Received: {}", message);
        }
        println!("Consumer finished!");
    });

    producer.join().unwrap();
    consumer.join().unwrap();

    println!("\nExample completed successfully!");
}
