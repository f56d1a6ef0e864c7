/* Copyright 2020 @Yuchen Wong */

pub type Float = f32;
pub type Int = i32;
pub type UInt = u32;

pub type Vector3f = nalgebra::Vector3<Float>;

/// Size in bytes of one stored element (float or uint).
pub const ELEMENT_BYTES: usize = 4;

/// Middle grey used when estimating HDR intensity.
pub const MIDDLE_GREY: Float = 0.18;
