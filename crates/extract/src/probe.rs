use crate::consts::{EXT_MAGIC, EXT_MAGIC_OFFSET};
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Whether the image starts with an ext2/3/4 superblock. PhotoRec's
/// `mode_ext2` uses the filesystem's block layout to carve more precisely.
///
/// Any read problem means "don't know", which means "no".
pub async fn has_ext_superblock(image: &Path) -> bool {
    let Ok(mut file) = tokio::fs::File::open(image).await else {
        return false;
    };
    if file.seek(std::io::SeekFrom::Start(EXT_MAGIC_OFFSET)).await.is_err() {
        return false;
    }
    let mut magic = [0u8; 2];
    file.read_exact(&mut magic).await.is_ok() && magic == EXT_MAGIC
}
