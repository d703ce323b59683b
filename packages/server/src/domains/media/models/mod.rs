pub mod media_download;
