/// Upload speed limits. Both checks are polled on every dispatch pass and must never block.
pub trait BandwidthPolicy {
    /// Whether the upload speed of the whole process exceeds its limit
    fn does_overall_upload_speed_exceed(&self) -> bool;
    /// Whether the upload speed of the torrent this connection belongs to exceeds its limit
    fn does_upload_speed_exceed(&self) -> bool;

    fn is_upload_throttled(&self) -> bool {
        self.does_overall_upload_speed_exceed() || self.does_upload_speed_exceed()
    }
}
