//! Example: Host a read-only "hello" file system on the loopback engine.
//!
//! Mounts a volume with a single file, lists the root, reads the file back
//! through the engine client and unmounts.
//!
//! Usage:
//!   RUST_LOG=debug cargo run --example hello_loopback -- [mount_point]

use rusty_fsp_host::status::{STATUS_END_OF_FILE, STATUS_OBJECT_NAME_NOT_FOUND};
use rusty_fsp_host::util::now_filetime;
use rusty_fsp_host::{
    DirEntry, FileInfo, FileSystem, FileSystemHost, FsResult, LoopbackClient, LoopbackEngine, MountOptions, Opened,
    VolumeConfiguration, VolumeFlags, VolumeInfo,
};

const HELLO_NAME: &str = "hello.txt";
const HELLO_DATA: &[u8] = b"Hello from a Rust file system!\n";
const FILE_ATTRIBUTE_READONLY: u32 = 0x01;
const FILE_ATTRIBUTE_DIRECTORY: u32 = 0x10;

/// A root directory holding one read-only file.
struct HelloFs {
    mounted_at: u64,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum HelloNode {
    Root,
    Hello,
}

impl HelloNode {
    fn info(self, time: u64) -> FileInfo {
        let info: FileInfo = FileInfo {
            creation_time: time,
            last_access_time: time,
            last_write_time: time,
            change_time: time,
            ..Default::default()
        };
        match self {
            HelloNode::Root => FileInfo {
                file_attributes: FILE_ATTRIBUTE_DIRECTORY,
                index_number: 1,
                ..info
            },
            HelloNode::Hello => FileInfo {
                file_attributes: FILE_ATTRIBUTE_READONLY,
                file_size: HELLO_DATA.len() as u64,
                allocation_size: 4096,
                index_number: 2,
                ..info
            },
        }
    }
}

impl FileSystem for HelloFs {
    type FileNode = HelloNode;
    type FileDesc = ();

    fn init(&self, config: &mut VolumeConfiguration) -> FsResult<()> {
        config.sector_size = 512;
        config.sectors_per_allocation_unit = 8;
        config.file_system_name = "HELLOFS".to_string();
        config.volume_creation_time = self.mounted_at;
        config.set_flags(VolumeFlags::READ_ONLY_VOLUME | VolumeFlags::CASE_PRESERVED_NAMES, true);
        Ok(())
    }

    fn get_volume_info(&self) -> FsResult<VolumeInfo> {
        Ok(VolumeInfo {
            total_size: 1024 * 1024,
            free_size: 0,
            label: "HELLO".to_string(),
        })
    }

    fn open(&self, name: &str, _create_options: u32, _granted_access: u32) -> FsResult<Opened<HelloNode, ()>> {
        let node: HelloNode = match name.trim_start_matches('\\') {
            "" => HelloNode::Root,
            n if n.eq_ignore_ascii_case(HELLO_NAME) => HelloNode::Hello,
            _ => return Err(STATUS_OBJECT_NAME_NOT_FOUND),
        };
        Ok(Opened::new(node, (), node.info(self.mounted_at)))
    }

    fn get_file_info(&self, node: &HelloNode, _desc: &()) -> FsResult<FileInfo> {
        Ok(node.info(self.mounted_at))
    }

    fn read(&self, _node: &HelloNode, _desc: &(), buffer: &mut [u8], offset: u64) -> FsResult<u32> {
        let start: usize = offset as usize;
        if start >= HELLO_DATA.len() {
            return Err(STATUS_END_OF_FILE);
        }
        let count: usize = buffer.len().min(HELLO_DATA.len() - start);
        buffer[..count].copy_from_slice(&HELLO_DATA[start..start + count]);
        Ok(count as u32)
    }

    fn read_directory(
        &self,
        node: &HelloNode,
        _desc: &(),
        _pattern: Option<&str>,
        marker: Option<&str>,
    ) -> FsResult<Vec<DirEntry>> {
        if *node != HelloNode::Root || marker.is_some() {
            return Ok(Vec::new());
        }
        Ok(vec![DirEntry {
            name: HELLO_NAME.to_string(),
            info: HelloNode::Hello.info(self.mounted_at),
        }])
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let mount_point: Option<String> = std::env::args().nth(1);
    let engine: LoopbackEngine = LoopbackEngine::new();
    let host: FileSystemHost<HelloFs, LoopbackEngine> = FileSystemHost::new(
        HelloFs {
            mounted_at: now_filetime(),
        },
        engine.clone(),
    );

    println!(
        "Engine version {}",
        FileSystemHost::<HelloFs, LoopbackEngine>::version()?
    );
    host.preflight(mount_point.as_deref())?;

    let options: MountOptions = MountOptions {
        mount_point,
        ..Default::default()
    };
    host.mount(options)?;
    let mounted_at: String = host.mount_point().unwrap_or_default();
    println!("\n✓ Mounted at {}", mounted_at);

    let client: LoopbackClient = engine
        .client(&mounted_at)
        .ok_or("mounted volume has no client")?;

    let volume: VolumeInfo = client.get_volume_info()?;
    println!("Volume {:?}: {} bytes", volume.label, volume.total_size);

    let mut root = client.open("\\", 0, 0)?.context;
    for entry in client.read_directory(&mut root, None, None, 4096)? {
        println!("  {:<12} {:>6} bytes", entry.name, entry.info.file_size);
    }
    client.close(&mut root)?;

    let mut hello = client.open("\\HELLO.TXT", 0, 0)?.context;
    let data: Vec<u8> = client.read(&mut hello, 0, 4096)?;
    print!("{}", String::from_utf8_lossy(&data));
    client.close(&mut hello)?;

    println!("Unmounting...");
    host.unmount();
    println!("✓ Unmounted");

    Ok(())
}
