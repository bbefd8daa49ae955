mod samples;
mod usage_windows;
