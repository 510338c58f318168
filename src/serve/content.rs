//! Built-in page content.

/// Served at the index route while no index page exists.
pub const DEFAULT_INDEX: &str = "\
>Default Home Page

This node is serving pages using rns-page-node, but index.mu was not found.
Please add an index.mu file to customize the home page.
";

/// Soft denial for pages that are missing or outside the served root.
pub const NOT_ALLOWED: &str = "\
>Request Not Allowed

You are not authorised to carry out the request.
";
