//! Mock implementations for external dependencies

use async_trait::async_trait;
use mockall::mock;
use source_plugins::SourceResult;
use source_plugins::utils::ytmusic::{CatalogSong, SongCatalog};

mock! {
    /// Stand-in for the YouTube Music catalog used by cross-resolving sources.
    pub Catalog {}

    #[async_trait]
    impl SongCatalog for Catalog {
        async fn initialize(&self) -> SourceResult<()>;
        async fn search_songs(&self, query: &str) -> SourceResult<Vec<CatalogSong>>;
    }
}

pub fn catalog_song(video_id: &str, duration_secs: u64) -> CatalogSong {
    CatalogSong {
        video_id: video_id.to_string(),
        name: "Catalog match".to_string(),
        artists: vec!["Official Artist".to_string()],
        duration_secs: Some(duration_secs),
    }
}
