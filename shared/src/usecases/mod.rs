pub mod download_audio;
