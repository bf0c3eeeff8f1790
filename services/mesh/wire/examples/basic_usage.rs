//! Basic usage example for the mesh wire format.

use bytes::Bytes;
use mesh_wire::{
    Accepted, Fragmenter, Frame, FrameHeader, LogicalAddress, MessageType, Reassembler,
    DEFAULT_PACKET_SIZE, MAX_FRAME_PAYLOAD,
};
use std::time::Instant;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Mesh Wire Format Example ===\n");

    // 1. Tree addresses
    println!("1. Working with tree addresses...");
    let node: LogicalAddress = "0321".parse()?;
    println!("   Node {} sits at depth {}", node, node.depth());
    let mut cur = node;
    while let Some(parent) = cur.parent() {
        println!("   {} -> parent {} (pipe {})", cur, parent, parent.pipe_address(5));
        cur = parent;
    }

    // 2. A single frame
    println!("\n2. Encoding a single frame...");
    let header = FrameHeader::new(LogicalAddress::ROOT, node, 1, MessageType(b'T'));
    let frame = Frame::new(header, Bytes::from_static(b"Hello, mesh!"));
    let packet = frame.encode(DEFAULT_PACKET_SIZE)?;
    println!("   Encoded packet: {} bytes", packet.len());
    let decoded = Frame::decode(packet)?;
    println!("   Payload: {:?}", std::str::from_utf8(&decoded.payload));

    // 3. Fragmentation
    println!("\n3. Fragmenting a larger message...");
    let payload = Bytes::from(vec![0x42u8; 200]);
    let fragmenter = Fragmenter::new(MAX_FRAME_PAYLOAD);
    let frames = fragmenter.split(header, payload.clone())?;
    println!("   Split into {} frames", frames.len());

    let mut reassembler = Reassembler::default();
    let now = Instant::now();
    for frame in frames.into_iter().rev() {
        let packet = frame.encode(DEFAULT_PACKET_SIZE)?;
        if let Accepted::Complete(message) = reassembler.accept(Frame::decode(packet)?, now)? {
            println!("   Reassembled {} bytes", message.payload.len());
            assert_eq!(message.payload, payload);
        }
    }

    println!("\n=== Example completed successfully ===");
    Ok(())
}
