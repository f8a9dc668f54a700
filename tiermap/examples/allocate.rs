use tiermap::{BitmapBuilder, HierarchicalBitmap};

pub fn main() {
    let tmp = tempfile::NamedTempFile::new().unwrap();

    // Create a bitmap for 4GiB of 4KiB blocks and hand out a few of them.
    let mut bitmap = BitmapBuilder::new(1024 * 1024)
        .with_backing(tmp.path())
        .build()
        .expect("should create");
    for _ in 0..3 {
        let blk = bitmap.find_first_free_and_allocate().unwrap();
        println!("allocated block {}", blk);
    }
    bitmap.clear(1).unwrap();
    bitmap.flush().unwrap();
    bitmap.close();

    let bitmap = HierarchicalBitmap::open(tmp.path(), 0).expect("should open");
    println!(
        "reopened: {} of {} blocks in use, next free is {:?}",
        bitmap.count_allocated(),
        bitmap.capacity(),
        bitmap.find_first_free()
    );
}
