//! Static export-table inspection of PE images.
//!
//! An image is never loaded or executed: the file is mapped read-only, the
//! headers and section table are parsed with `goblin`, and the export name
//! table is walked through [`ImageView`], which checks each offset against
//! the mapped length before touching it.

use crate::core::types::ModuleVerdict;
use goblin::pe::data_directories::DataDirectory;
use goblin::pe::export::{ExportDirectoryTable, SIZEOF_EXPORT_DIRECTORY_TABLE};
use goblin::pe::header::{Header, SIZEOF_COFF_HEADER, SIZEOF_PE_MAGIC};
use goblin::pe::optional_header::MAGIC_64;
use goblin::pe::options::ParseOptions;
use goblin::pe::section_table::SectionTable;
use goblin::pe::utils::find_offset;
use memmap2::Mmap;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

/// The class-object entry point every in-process COM server exports.
pub const COM_SERVER_EXPORT: &[u8] = b"DllGetClassObject";

/// Size of the DOS header; anything shorter cannot be an image.
pub const DOS_HEADER_SIZE: usize = 64;

/// Reasons an image is rejected.
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("failed to open image: {0}")]
    Open(#[source] std::io::Error),

    #[error("failed to map image: {0}")]
    Map(#[source] std::io::Error),

    #[error("image too small ({len} bytes)")]
    TooSmall { len: u64 },

    #[error("malformed headers: {0}")]
    Malformed(#[from] goblin::error::Error),

    #[error("image has no optional header")]
    MissingOptionalHeader,

    #[error("read of {len} bytes at offset {offset:#x} is outside the image")]
    OutOfBounds { offset: usize, len: usize },

    #[error("RVA {0:#x} is not backed by file data")]
    UnmappedRva(u32),

    #[error("export directory lists {names} names but only {functions} functions")]
    NameCountExceedsFunctions { names: u32, functions: u32 },

    #[error("export name at offset {0:#x} is not terminated")]
    UnterminatedName(usize),
}

/// Bounds-checked reader over image bytes.
#[derive(Debug, Clone, Copy)]
pub struct ImageView<'a> {
    data: &'a [u8],
}

impl<'a> ImageView<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Borrow `len` bytes starting at `offset`.
    pub fn slice_at(&self, offset: usize, len: usize) -> Result<&'a [u8], ImageError> {
        offset
            .checked_add(len)
            .and_then(|end| self.data.get(offset..end))
            .ok_or(ImageError::OutOfBounds { offset, len })
    }

    /// Borrow the NUL-terminated string at `offset`, without the terminator.
    ///
    /// The terminator may lie anywhere before the end of the image.
    pub fn cstr_at(&self, offset: usize) -> Result<&'a [u8], ImageError> {
        let tail = self
            .data
            .get(offset..)
            .ok_or(ImageError::OutOfBounds { offset, len: 1 })?;
        tail.iter()
            .position(|&b| b == 0)
            .map(|nul| &tail[..nul])
            .ok_or(ImageError::UnterminatedName(offset))
    }
}

/// Parsed headers of an image, borrowing its bytes.
#[derive(Debug)]
pub struct PeImage<'a> {
    view: ImageView<'a>,
    is_64: bool,
    file_alignment: u32,
    sections: Vec<SectionTable>,
    export: Option<DataDirectory>,
}

impl<'a> PeImage<'a> {
    /// Validate the DOS and NT headers and read the section table.
    pub fn parse(data: &'a [u8]) -> Result<Self, ImageError> {
        if data.len() < DOS_HEADER_SIZE {
            return Err(ImageError::TooSmall {
                len: data.len() as u64,
            });
        }

        let header = Header::parse(data)?;
        let optional = header
            .optional_header
            .ok_or(ImageError::MissingOptionalHeader)?;

        let mut offset = header.dos_header.pe_pointer as usize
            + SIZEOF_PE_MAGIC
            + SIZEOF_COFF_HEADER
            + header.coff_header.size_of_optional_header as usize;
        let sections = header.coff_header.sections(data, &mut offset)?;

        Ok(Self {
            view: ImageView::new(data),
            is_64: optional.standard_fields.magic == MAGIC_64,
            file_alignment: optional.windows_fields.file_alignment,
            sections,
            export: optional
                .data_directories
                .get_export_table()
                .copied()
                .filter(|directory| directory.virtual_address != 0),
        })
    }

    pub fn is_64(&self) -> bool {
        self.is_64
    }

    pub fn sections(&self) -> &[SectionTable] {
        &self.sections
    }

    pub fn export_data_directory(&self) -> Option<DataDirectory> {
        self.export
    }

    /// Translate an RVA into an offset into the file bytes.
    ///
    /// RVAs below every section start fall in the headers, where file and
    /// memory layout coincide.
    pub fn rva_to_offset(&self, rva: u32) -> Result<usize, ImageError> {
        if let Some(offset) = find_offset(
            rva as usize,
            &self.sections,
            self.file_alignment,
            &ParseOptions::default(),
        ) {
            return Ok(offset);
        }

        if self.sections.iter().all(|s| rva < s.virtual_address) {
            return Ok(rva as usize);
        }

        Err(ImageError::UnmappedRva(rva))
    }

    /// Read and validate the export directory, if the image has one.
    pub fn export_directory(&self) -> Result<Option<ExportDirectory<'_>>, ImageError> {
        let Some(directory) = self.export else {
            return Ok(None);
        };

        let base = self.rva_to_offset(directory.virtual_address)?;
        let table = self.view.slice_at(base, SIZEOF_EXPORT_DIRECTORY_TABLE)?;
        let table = ExportDirectoryTable::parse(table, 0)?;

        let number_of_functions = table.address_table_entries;
        let number_of_names = table.number_of_name_pointers;
        if number_of_names > number_of_functions {
            return Err(ImageError::NameCountExceedsFunctions {
                names: number_of_names,
                functions: number_of_functions,
            });
        }

        if number_of_functions > 0 {
            let offset = self.rva_to_offset(table.export_address_table_rva)?;
            self.view
                .slice_at(offset, table_len(number_of_functions, 4, offset)?)?;
        }

        let names = if number_of_names > 0 {
            let offset = self.rva_to_offset(table.name_pointer_rva)?;
            let names = self
                .view
                .slice_at(offset, table_len(number_of_names, 4, offset)?)?;

            let ordinals = self.rva_to_offset(table.ordinal_table_rva)?;
            self.view
                .slice_at(ordinals, table_len(number_of_names, 2, ordinals)?)?;
            names
        } else {
            &[]
        };

        Ok(Some(ExportDirectory {
            image: self,
            number_of_functions,
            number_of_names,
            names,
        }))
    }
}

fn table_len(count: u32, entry_size: usize, offset: usize) -> Result<usize, ImageError> {
    (count as usize)
        .checked_mul(entry_size)
        .ok_or(ImageError::OutOfBounds {
            offset,
            len: usize::MAX,
        })
}

/// Validated view of an image's export directory.
#[derive(Debug)]
pub struct ExportDirectory<'a> {
    image: &'a PeImage<'a>,
    pub number_of_functions: u32,
    pub number_of_names: u32,
    names: &'a [u8],
}

impl<'a> ExportDirectory<'a> {
    /// Iterate the exported names in name-table order.
    pub fn names(&self) -> impl Iterator<Item = Result<&'a [u8], ImageError>> + '_ {
        self.names.chunks_exact(4).map(move |entry| {
            let rva = u32::from_le_bytes([entry[0], entry[1], entry[2], entry[3]]);
            let offset = self.image.rva_to_offset(rva)?;
            self.image.view.cstr_at(offset)
        })
    }
}

/// Whether the image bytes export `DllGetClassObject` (exact, case-sensitive).
pub fn has_com_server_export(data: &[u8]) -> Result<bool, ImageError> {
    let image = PeImage::parse(data)?;
    let Some(exports) = image.export_directory()? else {
        return Ok(false);
    };

    for name in exports.names() {
        if name? == COM_SERVER_EXPORT {
            return Ok(true);
        }
    }

    Ok(false)
}

/// Classify image bytes.
pub fn inspect_bytes(data: &[u8]) -> ModuleVerdict {
    match has_com_server_export(data) {
        Ok(true) => ModuleVerdict::IsComServer,
        Ok(false) => ModuleVerdict::NotComServer,
        Err(e) => {
            log::trace!("Rejected image: {}", e);
            ModuleVerdict::InvalidImage
        }
    }
}

/// Classify the image at `path` without loading it.
pub fn inspect(path: &Path) -> ModuleVerdict {
    match map_image(path) {
        Ok(map) => {
            let verdict = inspect_bytes(&map);
            log::trace!("{}: {}", path.display(), verdict);
            verdict
        }
        Err(e) => {
            log::debug!("Cannot inspect {}: {}", path.display(), e);
            ModuleVerdict::InvalidImage
        }
    }
}

/// All exported names of the image at `path`, lossily decoded.
pub fn exported_names(path: &Path) -> Result<Vec<String>, ImageError> {
    let map = map_image(path)?;
    let image = PeImage::parse(&map)?;
    let Some(exports) = image.export_directory()? else {
        return Ok(Vec::new());
    };

    let names = exports
        .names()
        .map(|name| name.map(|n| String::from_utf8_lossy(n).into_owned()))
        .collect();
    names
}

/// Map a file read-only. The mapping is released when dropped.
fn map_image(path: &Path) -> Result<Mmap, ImageError> {
    let file = File::open(path).map_err(ImageError::Open)?;
    let len = file.metadata().map_err(ImageError::Open)?.len();
    if len < DOS_HEADER_SIZE as u64 {
        return Err(ImageError::TooSmall { len });
    }

    // SAFETY: the mapping is read-only and only read through ImageView.
    // Truncation of the file by another process while mapped is not guarded.
    unsafe { Mmap::map(&file) }.map_err(ImageError::Map)
}


#[cfg(test)]
mod tests {
    use super::fixtures::{build_image, put, Shape, E_LFANEW_OFFSET, FLAT};
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_single_export_not_com_server() {
        let image = build_image(&["ExampleExport"], FLAT);
        assert_eq!(inspect_bytes(&image), ModuleVerdict::NotComServer);
    }

    #[test]
    fn test_single_export_com_server() {
        let image = build_image(&["DllGetClassObject"], FLAT);
        assert_eq!(inspect_bytes(&image), ModuleVerdict::IsComServer);
    }

    #[test]
    fn test_match_among_many_exports() {
        let image = build_image(
            &[
                "DllCanUnloadNow",
                "DllGetClassObject",
                "DllRegisterServer",
                "DllUnregisterServer",
            ],
            FLAT,
        );
        assert_eq!(inspect_bytes(&image), ModuleVerdict::IsComServer);
    }

    #[test]
    fn test_match_is_exact() {
        for name in [
            "DllGetClassObj",
            "DllGetClassObjectEx",
            "XDllGetClassObject",
            "dllgetclassobject",
            "DLLGetClassObject",
            "",
        ] {
            let image = build_image(&[name], FLAT);
            assert_eq!(
                inspect_bytes(&image),
                ModuleVerdict::NotComServer,
                "name {:?} must not match",
                name
            );
        }
    }

    #[test]
    fn test_zero_exports() {
        let image = build_image(&[], FLAT);
        assert_eq!(inspect_bytes(&image), ModuleVerdict::NotComServer);
    }

    #[test]
    fn test_no_export_directory() {
        let mut image = build_image(&["DllGetClassObject"], FLAT);
        // Zero the export data-directory RVA
        put(&mut image, 0x58 + 112, &0u32.to_le_bytes());
        assert_eq!(inspect_bytes(&image), ModuleVerdict::NotComServer);

        // No data directories at all
        let mut image = build_image(&["DllGetClassObject"], FLAT);
        put(&mut image, 0x58 + 108, &0u32.to_le_bytes());
        assert_eq!(inspect_bytes(&image), ModuleVerdict::NotComServer);
    }

    #[test]
    fn test_invalid_leading_signature() {
        let mut image = build_image(&["DllGetClassObject"], FLAT);
        image[0] = b'X';
        assert_eq!(inspect_bytes(&image), ModuleVerdict::InvalidImage);

        assert_eq!(inspect_bytes(b"Not a PE file"), ModuleVerdict::InvalidImage);
        assert_eq!(inspect_bytes(&[]), ModuleVerdict::InvalidImage);
        assert_eq!(inspect_bytes(&[0u8; 64]), ModuleVerdict::InvalidImage);
    }

    #[test]
    fn test_invalid_nt_signature() {
        let mut image = build_image(&["DllGetClassObject"], FLAT);
        image[0x40] = b'N';
        assert!(matches!(
            has_com_server_export(&image),
            Err(ImageError::Malformed(_))
        ));
        assert_eq!(inspect_bytes(&image), ModuleVerdict::InvalidImage);
    }

    #[test]
    fn test_nt_offset_out_of_bounds() {
        let mut image = build_image(&["DllGetClassObject"], FLAT);
        put(&mut image, E_LFANEW_OFFSET, &0xFFFF_FFF0u32.to_le_bytes());
        assert_eq!(inspect_bytes(&image), ModuleVerdict::InvalidImage);
    }

    #[test]
    fn test_unknown_optional_header_magic() {
        let mut image = build_image(&["DllGetClassObject"], FLAT);
        put(&mut image, 0x58, &0x0107u16.to_le_bytes());
        assert!(matches!(
            has_com_server_export(&image),
            Err(ImageError::Malformed(goblin::error::Error::BadMagic(0x0107)))
        ));
    }

    #[test]
    fn test_name_count_beyond_image() {
        let mut image = build_image(&["ExampleExport"], FLAT);
        let huge = 0x4000_0000u32.to_le_bytes();
        put(&mut image, 0x200 + 20, &huge);
        put(&mut image, 0x200 + 24, &huge);
        assert!(matches!(
            has_com_server_export(&image),
            Err(ImageError::OutOfBounds { .. })
        ));
        assert_eq!(inspect_bytes(&image), ModuleVerdict::InvalidImage);
    }

    #[test]
    fn test_more_names_than_functions() {
        let mut image = build_image(&["A", "B"], FLAT);
        put(&mut image, 0x200 + 20, &1u32.to_le_bytes());
        assert!(matches!(
            has_com_server_export(&image),
            Err(ImageError::NameCountExceedsFunctions {
                names: 2,
                functions: 1
            })
        ));
    }

    #[test]
    fn test_unterminated_name() {
        let mut image = build_image(&["ExampleExport"], FLAT);
        // The last byte is the final name's terminator
        image.pop();
        assert!(matches!(
            has_com_server_export(&image),
            Err(ImageError::UnterminatedName(_))
        ));
    }

    #[test]
    fn test_name_pointer_outside_image() {
        let mut image = build_image(&["ExampleExport"], FLAT);
        let name_pointers = 0x200 + SIZEOF_EXPORT_DIRECTORY_TABLE + 4;
        put(&mut image, name_pointers, &0x00FF_0000u32.to_le_bytes());
        assert_eq!(inspect_bytes(&image), ModuleVerdict::InvalidImage);
    }

    #[test]
    fn test_sectioned_image() {
        let shape = Shape {
            pe32: false,
            sectioned: true,
        };
        let image = build_image(&["DllCanUnloadNow", "DllGetClassObject"], shape);
        let parsed = PeImage::parse(&image).unwrap();
        assert_eq!(parsed.sections().len(), 1);
        assert_eq!(parsed.rva_to_offset(0x2010).unwrap(), 0x410);
        assert_eq!(inspect_bytes(&image), ModuleVerdict::IsComServer);

        let image = build_image(&["ExampleExport"], shape);
        assert_eq!(inspect_bytes(&image), ModuleVerdict::NotComServer);
    }

    #[test]
    fn test_rva_past_raw_data() {
        let image = build_image(
            &["ExampleExport"],
            Shape {
                pe32: false,
                sectioned: true,
            },
        );
        let parsed = PeImage::parse(&image).unwrap();
        // Inside the section's virtual span but beyond its raw data
        let mut tweaked = image.clone();
        put(&mut tweaked, 0x148 + 8, &0x4000u32.to_le_bytes());
        let tweaked_parsed = PeImage::parse(&tweaked).unwrap();
        assert!(parsed.rva_to_offset(0x3800).is_err());
        assert!(matches!(
            tweaked_parsed.rva_to_offset(0x3800),
            Err(ImageError::UnmappedRva(0x3800))
        ));
    }

    #[test]
    fn test_pe32_image() {
        let shape = Shape {
            pe32: true,
            sectioned: true,
        };
        let image = build_image(&["DllGetClassObject"], shape);
        let parsed = PeImage::parse(&image).unwrap();
        assert!(!parsed.is_64());
        assert_eq!(inspect_bytes(&image), ModuleVerdict::IsComServer);
    }

    #[test]
    fn test_export_directory_counts() {
        let image = build_image(&["One", "Two", "Three"], FLAT);
        let parsed = PeImage::parse(&image).unwrap();
        let exports = parsed.export_directory().unwrap().unwrap();
        assert_eq!(exports.number_of_functions, 3);
        assert_eq!(exports.number_of_names, 3);

        let names: Vec<&[u8]> = exports.names().map(|n| n.unwrap()).collect();
        assert_eq!(names, vec![&b"One"[..], b"Two", b"Three"]);
    }

    #[test]
    fn test_image_view_bounds() {
        let view = ImageView::new(&[1, 2, 0, 4, 5]);
        assert_eq!(view.slice_at(1, 4).unwrap(), &[2, 0, 4, 5]);
        assert!(view.slice_at(2, 4).is_err());
        assert!(view.slice_at(usize::MAX, 2).is_err());
        assert_eq!(view.cstr_at(0).unwrap(), &[1, 2]);
        assert!(view.cstr_at(10).is_err());
        assert!(view.cstr_at(3).is_err());
    }

    #[test]
    fn test_long_name_before_match() {
        let long = "A".repeat(4096);
        let image = build_image(&[long.as_str(), "DllGetClassObject"], FLAT);
        assert_eq!(inspect_bytes(&image), ModuleVerdict::IsComServer);

        let long = "B".repeat(64 * 1024);
        let image = build_image(&[long.as_str()], FLAT);
        let parsed = PeImage::parse(&image).unwrap();
        let exports = parsed.export_directory().unwrap().unwrap();
        let names: Vec<&[u8]> = exports.names().map(|n| n.unwrap()).collect();
        assert_eq!(names, vec![long.as_bytes()]);
    }

    #[test]
    fn test_inspect_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&build_image(&["DllGetClassObject"], FLAT))
            .unwrap();
        file.flush().unwrap();
        assert_eq!(inspect(file.path()), ModuleVerdict::IsComServer);

        let names = exported_names(file.path()).unwrap();
        assert_eq!(names, vec!["DllGetClassObject".to_string()]);
    }

    #[test]
    fn test_inspect_unreadable_or_tiny_file() {
        assert_eq!(
            inspect(Path::new("/definitely/not/here.dll")),
            ModuleVerdict::InvalidImage
        );

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"MZ").unwrap();
        file.flush().unwrap();
        assert_eq!(inspect(file.path()), ModuleVerdict::InvalidImage);
    }
}
