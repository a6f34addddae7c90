pub mod error;
pub mod header;
pub mod block;
pub mod file_list;
pub mod io_stream;
pub mod archive;

pub use error::{TarError, TarResult};
pub use header::{checksum, Header, HeaderFields, Member};
pub use block::{block_count, strip_footer, write_footer, BLOCK_SIZE};
pub use file_list::FileList;
pub use archive::{
    append_files_to_archive, create_archive, extract_files_from_archive, get_archive_file_list,
    update_files_in_archive, ReadOptions,
};
