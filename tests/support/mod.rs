pub mod stub_browser;

pub use stub_browser::StubBrowser;
