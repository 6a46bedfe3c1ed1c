//! Load command insertion and removal on a thin image buffer.
//!
//! Both edits keep the file layout: the load command area grows into, or
//! gives back, the zero padding between the last command and the first
//! byte of segment data. The edited buffer is decoded again before it is
//! returned, loaded images are never patched in place.
use std::sync::Arc;

use crate::commands::LoadCommand;
use crate::errors::{Error, Result};
use crate::layout::Value;
use crate::loader::{ImageHeader, MachCommand, Slice};
use crate::source::MemorySource;

fn parse_header(image: &[u8]) -> Result<ImageHeader> {
    let len = image.len() as u64;
    let slice = Slice::new(Arc::new(MemorySource::new(image.to_vec())), 0, len, 0, 0);

    ImageHeader::parse(&slice)
}

/// Offsets of the end of the mach header and of the load command area.
fn command_area(header: &ImageHeader) -> Result<(usize, usize)> {
    let name = if header.header.is_64bit() {
        "mach_header_64"
    } else {
        "mach_header"
    };
    let start = header.layouts().size_of(name, header.header.ptr_size())?;

    Ok((start, start + header.header.sizeofcmds as usize))
}

/// The first file offset holding segment or section data.
fn first_data_offset(commands: &[MachCommand], len: usize) -> usize {
    commands
        .iter()
        .flat_map(|MachCommand(cmd, _)| match *cmd {
            LoadCommand::Segment {
                fileoff,
                filesize,
                ref sections,
                ..
            }
            | LoadCommand::Segment64 {
                fileoff,
                filesize,
                ref sections,
                ..
            } => sections
                .iter()
                .map(|section| u64::from(section.offset))
                .chain(if filesize > 0 { Some(fileoff) } else { None })
                .filter(|&offset| offset > 0)
                .collect::<Vec<u64>>(),
            _ => vec![],
        })
        .min()
        .map_or(len, |offset| (offset as usize).min(len))
}

fn write_counts(image: &mut [u8], header: &ImageHeader, ncmds: u32, sizeofcmds: u32) -> Result<()> {
    let name = if header.header.is_64bit() {
        "mach_header_64"
    } else {
        "mach_header"
    };
    let ptr_size = header.header.ptr_size();
    let layouts = header.layouts();
    let mut record = layouts.decode(name, image, 0, ptr_size)?;

    record.set("ncmds", Value::Unsigned(u64::from(ncmds)));
    record.set("sizeofcmds", Value::Unsigned(u64::from(sizeofcmds)));

    let bytes = layouts.encode(&record, ptr_size)?;

    image[..bytes.len()].copy_from_slice(&bytes);

    Ok(())
}

/// Remove the load command at `index`, returning the edited image.
pub fn remove_load_command(image: &[u8], index: usize) -> Result<Vec<u8>> {
    let header = parse_header(image)?;
    let (start, end) = command_area(&header)?;

    if index >= header.commands.len() {
        return Err(Error::LoadError(format!(
            "no load command #{}, the image has {}",
            index,
            header.commands.len()
        )));
    }

    let offset = start + header.commands[..index].iter().map(MachCommand::size).sum::<usize>();
    let size = header.commands[index].size();
    let mut patched = image.to_vec();

    debug!(
        "remove {} command #{} of {} bytes @ 0x{:x}",
        header.commands[index].command().name(),
        index,
        size,
        offset
    );

    patched.copy_within(offset + size..end, offset);
    for b in &mut patched[end - size..end] {
        *b = 0;
    }

    write_counts(
        &mut patched,
        &header,
        header.header.ncmds - 1,
        header.header.sizeofcmds - size as u32,
    )?;

    parse_header(&patched)?;

    Ok(patched)
}

/// Append an encoded load command after the last one, returning the edited image.
///
/// The command must carry its own `cmdsize`, padded to the pointer size, and
/// fit into the zero padding before the first segment data.
pub fn insert_load_command(image: &[u8], command: &[u8]) -> Result<Vec<u8>> {
    let header = parse_header(image)?;
    let (_, end) = command_area(&header)?;
    let layouts = header.layouts();
    let ptr_size = header.header.ptr_size();

    let cmdsize = layouts.uint_at(command, 4, 4)? as usize;

    if cmdsize != command.len() || cmdsize < 8 || cmdsize % ptr_size != 0 {
        return Err(Error::MalformedLoadCommands(format!(
            "command of {} bytes declares cmdsize {}",
            command.len(),
            cmdsize
        )));
    }

    let limit = first_data_offset(&header.commands, image.len());
    let available = limit.saturating_sub(end);

    if cmdsize > available || image[end..end + cmdsize].iter().any(|&b| b != 0) {
        return Err(Error::LoadError(format!(
            "no room for a {} bytes command, {} bytes of padding before 0x{:x}",
            cmdsize, available, limit
        )));
    }

    debug!(
        "insert {} command of {} bytes @ 0x{:x}",
        LoadCommand::cmd_name(layouts.uint_at(command, 0, 4)? as u32),
        cmdsize,
        end
    );

    let mut patched = image.to_vec();

    patched[end..end + cmdsize].copy_from_slice(command);

    write_counts(
        &mut patched,
        &header,
        header.header.ncmds + 1,
        header.header.sizeofcmds + cmdsize as u32,
    )?;

    parse_header(&patched)?;

    Ok(patched)
}

#[cfg(test)]
pub mod tests {
    use byteorder::{BigEndian, LittleEndian, WriteBytesExt};

    use super::*;
    use crate::consts::*;

    fn rpath_command(path: &str) -> Vec<u8> {
        let size = (12 + path.len() + 1 + 7) & !7;
        let mut buf = Vec::new();

        buf.write_u32::<LittleEndian>(LC_RPATH).unwrap();
        buf.write_u32::<LittleEndian>(size as u32).unwrap();
        buf.write_u32::<LittleEndian>(12).unwrap();
        buf.extend_from_slice(path.as_bytes());
        buf.resize(size, 0);
        buf
    }

    fn uuid_command(b: u8) -> Vec<u8> {
        let mut buf = Vec::new();

        buf.write_u32::<LittleEndian>(LC_UUID).unwrap();
        buf.write_u32::<LittleEndian>(24).unwrap();
        buf.extend_from_slice(&[b; 16]);
        buf
    }

    /// A header, the commands, then a __TEXT segment whose data starts at 0x200.
    fn image(commands: &[Vec<u8>]) -> Vec<u8> {
        let mut segment = Vec::new();

        segment.write_u32::<LittleEndian>(LC_SEGMENT_64).unwrap();
        segment.write_u32::<LittleEndian>(72).unwrap();
        segment.extend_from_slice(b"__TEXT\0\0\0\0\0\0\0\0\0\0");
        for &v in &[0x1_0000_0000u64, 0x1000, 0x200, 0x100] {
            segment.write_u64::<LittleEndian>(v).unwrap();
        }
        for &v in &[5u32, 5, 0, 0] {
            segment.write_u32::<LittleEndian>(v).unwrap();
        }

        let mut all = vec![segment];
        all.extend(commands.iter().cloned());

        let mut buf = Vec::new();

        buf.write_u32::<LittleEndian>(MH_MAGIC_64).unwrap();
        buf.write_i32::<LittleEndian>(CPU_TYPE_ARM64).unwrap();
        buf.write_i32::<LittleEndian>(0).unwrap();
        buf.write_u32::<LittleEndian>(MH_DYLIB).unwrap();
        buf.write_u32::<LittleEndian>(all.len() as u32).unwrap();
        buf.write_u32::<LittleEndian>(all.iter().map(|cmd| cmd.len() as u32).sum()).unwrap();
        buf.write_u32::<LittleEndian>(0).unwrap();
        buf.write_u32::<LittleEndian>(0).unwrap();
        for cmd in &all {
            buf.extend_from_slice(cmd);
        }
        buf.resize(0x200, 0);
        buf.resize(0x300, 0xcc);
        buf
    }

    fn rpaths(image: &[u8]) -> Vec<String> {
        parse_header(image)
            .unwrap()
            .commands
            .into_iter()
            .filter_map(|MachCommand(cmd, _)| match cmd {
                LoadCommand::Rpath(path) => Some(path.to_string()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_insert_load_command() {
        let original = image(&[rpath_command("@loader_path")]);
        let patched = insert_load_command(&original, &rpath_command("@executable_path/../Frameworks")).unwrap();
        let header = parse_header(&patched).unwrap();

        assert_eq!(header.header.ncmds, 3);
        assert_eq!(patched.len(), original.len());
        assert_eq!(&patched[0x200..], &original[0x200..]);
        assert_eq!(rpaths(&patched), vec!["@loader_path", "@executable_path/../Frameworks"]);
    }

    #[test]
    fn test_remove_load_command() {
        let original = image(&[rpath_command("@loader_path"), uuid_command(0x11), rpath_command("/usr/lib")]);
        let patched = remove_load_command(&original, 1).unwrap();
        let header = parse_header(&patched).unwrap();

        assert_eq!(header.header.ncmds, 3);
        assert_eq!(header.header.sizeofcmds, 72 + 32 + 24);
        assert!(header.commands.iter().all(|cmd| cmd.command().cmd() != LC_UUID));
        assert_eq!(rpaths(&patched), vec!["@loader_path", "/usr/lib"]);
        assert!(patched[32 + 72 + 32 + 24..0x200].iter().all(|&b| b == 0));

        assert!(remove_load_command(&original, 4).is_err());
    }

    #[test]
    fn test_insert_without_room() {
        let original = image(&[]);
        let long = "x".repeat(0x200);

        assert!(matches!(
            insert_load_command(&original, &rpath_command(&long)),
            Err(Error::LoadError(_))
        ));

        let mut bad = rpath_command("@loader_path");
        bad[4] = 12;

        assert!(matches!(
            insert_load_command(&original, &bad),
            Err(Error::MalformedLoadCommands(_))
        ));
    }

    #[test]
    fn test_big_endian_counts() {
        let mut buf = Vec::new();

        buf.write_u32::<BigEndian>(MH_MAGIC).unwrap();
        buf.write_i32::<BigEndian>(CPU_TYPE_POWERPC).unwrap();
        buf.write_i32::<BigEndian>(0).unwrap();
        buf.write_u32::<BigEndian>(MH_EXECUTE).unwrap();
        buf.write_u32::<BigEndian>(0).unwrap();
        buf.write_u32::<BigEndian>(0).unwrap();
        buf.write_u32::<BigEndian>(0).unwrap();
        buf.resize(0x100, 0);

        let mut uuid = Vec::new();
        uuid.write_u32::<BigEndian>(LC_UUID).unwrap();
        uuid.write_u32::<BigEndian>(24).unwrap();
        uuid.extend_from_slice(&[0x22; 16]);

        let patched = insert_load_command(&buf, &uuid).unwrap();

        assert_eq!(&patched[16..24], &[0, 0, 0, 1, 0, 0, 0, 24]);
        assert_eq!(&patched[28..52], &uuid[..]);
    }
}
